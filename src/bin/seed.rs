//! Operator tool: mint membership redeem codes.
//!
//! ```text
//! cargo run --bin seed -- --count 10 --grant-days 365 --expires-in-days 90
//! ```

use chrono::{Duration, Utc};
use clap::Parser;
use rand::Rng;
use sqlx::sqlite::SqlitePoolOptions;

use tollgate::{
    domain::{RedeemCode, RedeemCodeStatus},
    repository::{RedeemCodeRepository, SqliteRedeemCodeRepository},
};

const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 24;

#[derive(Parser, Debug)]
#[command(name = "seed", about = "Mint redeem codes")]
struct Args {
    /// Number of codes to mint
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Membership days each code grants
    #[arg(long, default_value_t = 365)]
    grant_days: i64,

    /// Days until the codes themselves expire (unset = never)
    #[arg(long)]
    expires_in_days: Option<i64>,

    /// Database URL
    #[arg(long, default_value = "sqlite://tollgate.db")]
    database_url: String,
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect(&args.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let repo = SqliteRedeemCodeRepository::new(pool);
    let now = Utc::now();
    let expires_at = args.expires_in_days.map(|days| now + Duration::days(days));

    for _ in 0..args.count {
        let code = RedeemCode {
            code: random_code(),
            status: RedeemCodeStatus::Unused,
            grant_days: args.grant_days,
            used_by: None,
            used_by_email: None,
            used_at: None,
            expires_at,
            created_at: now,
        };
        repo.create(&code).await?;
        println!("{}", code.code);
    }

    Ok(())
}
