/// Legacy nonce/digest authentication and user management
use super::command_succeeded;
use crate::core::Connection;
use crate::error::WireResult;
use crate::protocol::UpdateFlags;
use crate::utils::{auth_key, namespace, password_digest};
use bson::rawdoc;
use tracing::{debug, warn};

impl Connection {
    /// Create or update a user in `db`, storing only the password digest
    pub fn add_user(&mut self, db: &str, user: &str, password: &str) -> WireResult<()> {
        let digest = password_digest(user, password);
        let selector = rawdoc! { "user": user };
        let update = rawdoc! { "$set": { "pwd": digest } };

        self.update(
            &namespace(db, "system.users"),
            &selector,
            &update,
            UpdateFlags::UPSERT,
        )
    }

    /// Authenticate this socket against `db`. Returns whether the server
    /// accepted the credentials. Authentication is tied to the socket and
    /// has to be repeated after a reconnect.
    pub fn authenticate(&mut self, db: &str, user: &str, password: &str) -> WireResult<bool> {
        let reply = self.run_command(db, &rawdoc! { "getnonce": 1 })?;
        let nonce = match reply.get_str("nonce") {
            Ok(nonce) => nonce.to_string(),
            Err(_) => {
                warn!("getnonce on {} returned no nonce", db);
                return Ok(false);
            }
        };

        let digest = password_digest(user, password);
        let key = auth_key(&nonce, user, &digest);
        let command = rawdoc! {
            "authenticate": 1,
            "user": user,
            "nonce": nonce,
            "key": key,
        };

        let reply = self.run_command(db, &command)?;
        let accepted = command_succeeded(&reply);
        debug!("Authentication of {} on {}: {}", user, db, accepted);
        Ok(accepted)
    }
}
