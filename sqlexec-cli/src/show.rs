//! Outcome rendering: aligned text tables for row sets, MySQL-flavored
//! status lines for writes, plus the timing suffix the interactive shell
//! appends after each statement.

use sqlexec::types::Row;

use crate::engine::Outcome;

/// The client-facing text for one outcome. Row sets render as a table with
/// a row-count footer; writes as a `Query OK` line; messages verbatim.
pub fn render(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Message(message) => message.clone(),
        Outcome::Affected(n) => format!("Query OK, {} affected", count_rows(*n)),
        Outcome::Rows { columns, rows } => render_table(columns, rows),
    }
}

/// The `(0.003 sec)` suffix printed by the interactive shell.
pub fn timing_line(elapsed_secs: f64) -> String {
    format!("({:.3} sec)", elapsed_secs)
}

fn count_rows(n: u64) -> String {
    if n == 1 {
        "1 row".into()
    } else {
        format!("{} rows", n)
    }
}

fn render_table(columns: &[String], rows: &[Row]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let cell = row
                        .get(column)
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "NULL".to_string());
                    widths[i] = widths[i].max(cell.len());
                    cell
                })
                .collect()
        })
        .collect();

    let mut out = String::new();
    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
        .collect();
    out.push_str(&header.join(" | "));
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&rule.join("-+-"));
    for row in cells {
        out.push('\n');
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        out.push_str(&line.join(" | "));
    }
    out.push_str(&format!("\n({} in set)", count_rows(rows.len() as u64)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlexec::types::Value;

    #[test]
    fn renders_rows_as_aligned_table() {
        let outcome = Outcome::Rows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                Row::from_pairs([("id", Value::Integer(1)), ("name", Value::String("Alice".into()))]),
                Row::from_pairs([("id", Value::Integer(2)), ("name", Value::Null)]),
            ],
        };
        let text = render(&outcome);
        assert!(text.starts_with("id | name"));
        assert!(text.contains("1  | Alice"));
        assert!(text.contains("2  | NULL"));
        assert!(text.ends_with("(2 rows in set)"));
    }

    #[test]
    fn affected_counts_pluralize() {
        assert_eq!(render(&Outcome::Affected(1)), "Query OK, 1 row affected");
        assert_eq!(render(&Outcome::Affected(3)), "Query OK, 3 rows affected");
        assert_eq!(render(&Outcome::Message("bye".into())), "bye");
    }

    #[test]
    fn timing_suffix_has_millisecond_precision() {
        assert_eq!(timing_line(0.0034567), "(0.003 sec)");
        assert_eq!(timing_line(1.25), "(1.250 sec)");
    }
}
