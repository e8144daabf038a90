use crate::session::Session;
use crate::types::User;
use anyhow::Result;
use duckdb::{Row, params};

const INSERT_USER: &str =
    "INSERT INTO users (name) VALUES (?) RETURNING id, name, epoch_us(create_date)";
const SELECT_USERS: &str = "SELECT id, name, epoch_us(create_date) FROM users";

type UserRow = (i64, String, i64);

fn read_row(row: &Row<'_>) -> duckdb::Result<UserRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

/// Insert a user and commit. The returned record carries the generated id and timestamp.
pub async fn create(session: &mut Session, name: &str) -> Result<User> {
    let name = name.to_string();
    let (id, name, create_date) = session
        .run(move |conn| {
            let mut stmt = conn.prepare(INSERT_USER)?;
            Ok(stmt.query_row(params![name], read_row)?)
        })
        .await?;
    session.commit().await?;

    User::from_raw(id, name, create_date)
}

/// Every user in insertion order
pub async fn list_all(session: &mut Session) -> Result<Vec<User>> {
    let rows = session
        .run(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_USERS} ORDER BY id"))?;
            let rows = stmt
                .query_map([], read_row)?
                .collect::<duckdb::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await?;

    rows.into_iter()
        .map(|(id, name, create_date)| User::from_raw(id, name, create_date))
        .collect()
}

/// The user with `id`, or `None` if there is none
pub async fn get_by_id(session: &mut Session, id: i64) -> Result<Option<User>> {
    let row = session
        .run(move |conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_USERS} WHERE id = ?"))?;
            let mut rows = stmt.query(params![id])?;
            let row = match rows.next()? {
                Some(row) => Some(read_row(row)?),
                None => None,
            };
            Ok(row)
        })
        .await?;

    row.map(|(id, name, create_date)| User::from_raw(id, name, create_date))
        .transpose()
}
