//! Plan-text parsing.
//!
//! The planning layer hands over a numbered task list; each entry may carry
//! a dependency annotation:
//!
//! ```text
//! 1. Set up database schema
//! 2. Implement API endpoints [depends: 1]
//! 3. Write integration tests [depends: 1, 2]
//! 4. Update changelog [depends: none]
//! ```
//!
//! No annotation means "depends on the previous task" (resolved later);
//! `[depends: none]` means explicitly no dependencies. Tolerant line
//! scanning — anything that doesn't look like a task entry is skipped.

/// One parsed plan entry. `depends_on_orders` mirrors the three-way
/// dependency contract: `None` = implicit previous-task fallback,
/// `Some([])` = explicitly none, `Some(orders)` = explicit references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub order: u32,
    pub name: String,
    pub depends_on_orders: Option<Vec<u32>>,
}

/// Parse plan text into task entries. Entries may be numbered (`1.`, `2)`)
/// or plain bullets (`-`, `*`), with bullets numbered sequentially after the
/// last explicit number.
pub fn parse_plan(text: &str) -> Vec<PlannedTask> {
    let mut tasks = Vec::new();
    let mut next_order: u32 = 1;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Strip a leading bullet, then an optional checkbox marker.
        let mut rest = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .unwrap_or(trimmed)
            .trim_start();
        for marker in ["[ ] ", "[x] ", "[X] "] {
            if let Some(r) = rest.strip_prefix(marker) {
                rest = r;
                break;
            }
        }

        let (order, body) = match split_leading_number(rest) {
            Some((n, body)) => (n, body),
            // Bullets without a number only count inside a bulleted list.
            None if trimmed.starts_with('-') || trimmed.starts_with('*') => (next_order, rest),
            None => continue,
        };

        let (name, deps) = split_annotation(body);
        if name.is_empty() {
            continue;
        }

        next_order = order + 1;
        tasks.push(PlannedTask {
            order,
            name: name.to_string(),
            depends_on_orders: deps,
        });
    }
    tasks
}

/// `"2. Implement API"` → `(2, "Implement API")`. Accepts `N.` and `N)`.
fn split_leading_number(s: &str) -> Option<(u32, &str)> {
    let digits_end = s.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let order = s[..digits_end].parse::<u32>().ok()?;
    let rest = &s[digits_end..];
    let body = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    Some((order, body.trim_start()))
}

/// Split a trailing `[depends: …]` (or `[after: …]`) annotation off the
/// task name. `none` or an empty list means explicitly no dependencies.
fn split_annotation(body: &str) -> (&str, Option<Vec<u32>>) {
    for key in ["[depends:", "[after:"] {
        if let Some(start) = body.to_ascii_lowercase().find(key) {
            let tail = &body[start + key.len()..];
            if let Some(close) = tail.find(']') {
                let name = body[..start].trim();
                let list = tail[..close].trim();
                if list.is_empty() || list.eq_ignore_ascii_case("none") {
                    return (name, Some(Vec::new()));
                }
                let orders: Vec<u32> = list
                    .split(',')
                    .filter_map(|t| t.trim().parse::<u32>().ok())
                    .collect();
                return (name, Some(orders));
            }
        }
    }
    (body.trim(), None)
}
