use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqlResult};

use super::Database;
use crate::models::User;

impl Database {
    pub fn find_user(&self, username: &str) -> SqlResult<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn create_user(&self, username: &str, password_hash: &str) -> SqlResult<i64> {
        self.conn.execute(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![username, password_hash, Utc::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn count_users(&self) -> SqlResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_finds_users() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.count_users().unwrap(), 0);
        let id = db.create_user("buchhaltung", "pbkdf2-sha256$1$a$b").unwrap();
        let user = db.find_user("buchhaltung").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.password_hash, "pbkdf2-sha256$1$a$b");
        assert!(db.find_user("niemand").unwrap().is_none());
        assert!(db.create_user("buchhaltung", "x").is_err());
    }
}
