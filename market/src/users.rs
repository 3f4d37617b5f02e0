//! Users and their default wallets

use crate::{
    error::{Error, Result},
    tables::{keys, USERNAMES, USERS},
    types::{Role, User},
};
use chrono::Utc;
use wagerbook_ledger::{Account, ReadTables, UnitOfWork, UserId};

/// Username of the platform's own user
pub const HOUSE_USERNAME: &str = "house";

/// Trim and check a registration request
pub(crate) fn normalize_new_user(username: &str, display_name: &str) -> Result<(String, String)> {
    let username = username.trim();
    let display_name = display_name.trim();
    if username.is_empty() || display_name.is_empty() {
        return Err(Error::Validation(
            "username and display name are required".to_string(),
        ));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(Error::Validation(
            "username must not contain whitespace".to_string(),
        ));
    }
    if username.eq_ignore_ascii_case(HOUSE_USERNAME) {
        return Err(Error::Validation(format!(
            "username '{}' is reserved",
            HOUSE_USERNAME
        )));
    }
    Ok((username.to_string(), display_name.to_string()))
}

/// Create a user together with its default wallet
pub(crate) fn create_user(
    uow: &UnitOfWork<'_>,
    username: &str,
    display_name: &str,
    role: Role,
) -> Result<User> {
    let user = User {
        id: UserId::new(),
        username: username.to_string(),
        display_name: display_name.to_string(),
        role,
        created_at: Utc::now(),
    };

    if uow
        .insert_if_absent(USERNAMES, &keys::username(username), &user.id)?
        .is_some()
    {
        return Err(Error::Conflict(format!(
            "username '{}' already exists",
            username
        )));
    }
    uow.put(USERS, user.id.as_bytes(), &user)?;
    uow.ensure_default_wallet(user.id)?;

    Ok(user)
}

/// House user and account, created on first use
pub(crate) fn ensure_house(uow: &UnitOfWork<'_>) -> Result<Account> {
    let key = keys::username(HOUSE_USERNAME);
    if uow.insert_if_absent(USERNAMES, &key, &UserId::HOUSE)?.is_none() {
        let house = User {
            id: UserId::HOUSE,
            username: HOUSE_USERNAME.to_string(),
            display_name: "House".to_string(),
            role: Role::Admin,
            created_at: Utc::now(),
        };
        uow.put(USERS, house.id.as_bytes(), &house)?;
        tracing::info!(user_id = %house.id, "Created house user");
    }
    Ok(uow.ensure_house()?)
}

/// Change a user's role
pub(crate) fn set_role(uow: &UnitOfWork<'_>, username: &str, role: Role) -> Result<User> {
    let id: UserId = uow
        .get_for_update(USERNAMES, &keys::username(username))?
        .ok_or_else(|| Error::NotFound(format!("user '{}'", username)))?;
    if id.is_house() {
        return Err(Error::Forbidden("the house user's role is fixed".to_string()));
    }
    let mut user: User = uow
        .get_for_update(USERS, id.as_bytes())?
        .ok_or_else(|| Error::NotFound(format!("user {}", id)))?;
    user.role = role;
    uow.put(USERS, user.id.as_bytes(), &user)?;
    Ok(user)
}

/// User by id
pub fn user<R: ReadTables>(reader: &R, id: &UserId) -> Result<Option<User>> {
    Ok(reader.get(USERS, id.as_bytes())?)
}

/// User by id, failing with `NotFound`
pub fn require_user<R: ReadTables>(reader: &R, id: &UserId) -> Result<User> {
    user(reader, id)?.ok_or_else(|| Error::NotFound(format!("user {}", id)))
}

/// User by username, case-insensitively
pub fn user_by_username<R: ReadTables>(reader: &R, username: &str) -> Result<Option<User>> {
    let id: Option<UserId> = reader.get(USERNAMES, &keys::username(username))?;
    match id {
        Some(id) => user(reader, &id),
        None => Ok(None),
    }
}

/// Every user except the house
pub fn members<R: ReadTables>(reader: &R) -> Result<Vec<User>> {
    Ok(reader
        .scan_prefix::<User>(USERS, &[])?
        .into_iter()
        .map(|(_, user)| user)
        .filter(|user| !user.id.is_house())
        .collect())
}
