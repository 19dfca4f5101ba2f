pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS delegations (
    timestamp INTEGER PRIMARY KEY,
    amount INTEGER NOT NULL,
    delegator TEXT NOT NULL,
    block TEXT NOT NULL
);
"#;
