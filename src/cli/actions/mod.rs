pub mod server;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        session_secret: SecretString,
        admin_password_hash: SecretString,
        frontend_base_url: String,
        rate_limit_fail_closed: bool,
    },
}
