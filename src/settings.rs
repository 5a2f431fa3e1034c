use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Server {
    pub listen: String,
    pub public_base_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Auth {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub otp_ttl_seconds: i64,
    pub otp_digits: u32,
    pub otp_max_attempts: i32,
}

/// How the booking ledger treats date ranges that collide with an already
/// approved booking of the same post.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Collisions are only reported through the availability endpoint.
    #[default]
    Advisory,
    /// Creating or approving a colliding booking fails with a conflict.
    Reject,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settlement {
    pub platform_fee_bps: i64,
    pub overlap_policy: OverlapPolicy,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    pub root: String,
    pub max_file_bytes: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Razorpay {
    pub url: String,
    pub key_id: String,
    pub key_secret: String,
    pub verify_signatures: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackplaneKind {
    #[default]
    Local,
    Postgres,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Realtime {
    pub backplane: BackplaneKind,
    pub channel: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub postgres: Postgres,
    pub auth: Auth,
    pub settlement: Settlement,
    pub storage: Storage,
    pub razorpay: Razorpay,
    pub realtime: Realtime,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.listen", "0.0.0.0:5000")?
            .set_default("server.public_base_url", "http://localhost:5000")?
            .set_default("postgres.max_connections", 5)?
            .set_default("auth.token_ttl_hours", 720)?
            .set_default("auth.otp_ttl_seconds", 300)?
            .set_default("auth.otp_digits", 6)?
            .set_default("auth.otp_max_attempts", 5)?
            .set_default("settlement.platform_fee_bps", 100)?
            .set_default("settlement.overlap_policy", "advisory")?
            .set_default("storage.root", "uploads")?
            .set_default("storage.max_file_bytes", 10 * 1024 * 1024)?
            .set_default("razorpay.url", "https://api.razorpay.com")?
            .set_default("razorpay.verify_signatures", true)?
            .set_default("realtime.backplane", "local")?
            .set_default("realtime.channel", "rental_realtime")?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RENTAL").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[postgres]
url = "postgres://localhost/rental"

[auth]
jwt_secret = "secret"

[razorpay]
key_id = "rzp_test"
key_secret = "shh"

[settlement]
overlap_policy = "reject"
"#
        )
        .unwrap();

        let settings = Settings::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.server.listen, "0.0.0.0:5000");
        assert_eq!(settings.settlement.platform_fee_bps, 100);
        assert_eq!(settings.settlement.overlap_policy, OverlapPolicy::Reject);
        assert_eq!(settings.auth.otp_digits, 6);
        assert_eq!(settings.auth.otp_max_attempts, 5);
        assert_eq!(settings.realtime.backplane, BackplaneKind::Local);
        assert_eq!(settings.storage.max_file_bytes, 10 * 1024 * 1024);
    }
}
