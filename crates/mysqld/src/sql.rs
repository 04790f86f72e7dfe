//! Statements issued through the `mysql` client, and parsing of its batch output.

use serde::{Deserialize, Serialize};

/// A database and owning user created on every start if missing.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PreseededDatabase {
    /// Database name.
    pub db_name: String,

    /// User granted all privileges on the database.
    pub user: String,

    /// The user's password; updated if the user already exists.
    #[serde(default)]
    pub password: String,
}

pub const SHOW_WSREP_ON: &str = "SHOW GLOBAL VARIABLES LIKE 'wsrep\\_on';";
pub const SHOW_WSREP_READY: &str = "SHOW STATUS LIKE 'wsrep\\_ready';";

pub const REVOKE_TEST_DATABASES: &str =
    "DELETE FROM mysql.db WHERE Db IN ('test', 'test\\_%');\nFLUSH PRIVILEGES;\n";
pub const SHOW_TEST_DATABASES: &str =
    "SHOW DATABASES LIKE 'test';\nSHOW DATABASES LIKE 'test\\_%';\n";

/// Quotes an identifier with backticks.
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quotes a string literal with single quotes.
pub fn quote_str(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Builds an idempotent script creating every database, user and grant.
pub fn seed_script(databases: &[PreseededDatabase]) -> String {
    let mut script = String::new();

    for db in databases {
        let name = quote_ident(&db.db_name);
        let user = format!("{}@'%'", quote_str(&db.user));
        let password = quote_str(&db.password);

        script.push_str(&format!("CREATE DATABASE IF NOT EXISTS {name};\n"));
        script.push_str(&format!(
            "CREATE USER IF NOT EXISTS {user} IDENTIFIED BY {password};\n"
        ));
        script.push_str(&format!("ALTER USER {user} IDENTIFIED BY {password};\n"));
        script.push_str(&format!("GRANT ALL PRIVILEGES ON {name}.* TO {user};\n"));
    }

    script.push_str("FLUSH PRIVILEGES;\n");
    script
}

/// Builds the script dropping the named databases.
pub fn drop_databases_script<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(|name| format!("DROP DATABASE IF EXISTS {};\n", quote_ident(name)))
        .collect()
}

/// Returns the value column of the first row of `SHOW ... LIKE` batch output.
pub fn variable_value(output: &str) -> Option<&str> {
    output
        .lines()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split('\t').nth(1))
        .map(str::trim)
}

/// Interprets the `wsrep_on` / `wsrep_ready` pair.
///
/// Replication switched off (or absent) means the node is reachable as soon
/// as it answers; with replication on it must also report ready.
pub fn is_reachable(wsrep_on: Option<&str>, wsrep_ready: Option<&str>) -> bool {
    match wsrep_on {
        None => true,
        Some(on) if on.eq_ignore_ascii_case("OFF") => true,
        Some(_) => wsrep_ready.is_some_and(|ready| ready.eq_ignore_ascii_case("ON")),
    }
}
