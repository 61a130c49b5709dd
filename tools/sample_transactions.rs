//! Sample Transaction Generator
//!
//! Writes a synthetic transactions CSV for exercising the scoring endpoint.
//!
//! Usage: `sample-transactions [count] [fraud_rate] [output|-] [seed]`

use anyhow::Context;
use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::io::Write;
use tracing::info;

/// One CSV row
#[derive(Debug, Clone, Serialize)]
struct SampleTransaction {
    transaction_id: String,
    timestamp: String,
    amount: f64,
    hour: u8,
    merchant_category: String,
    country: String,
    is_international: bool,
    is_online: bool,
    card_present: bool,
    tx_count_last_hour: u32,
    tx_amount_last_24h: f64,
    distance_from_last_tx: f64,
    account_age_days: u32,
}

/// Transaction generator for testing
struct TransactionGenerator {
    rng: StdRng,
    transaction_counter: u64,
}

impl TransactionGenerator {
    fn new(seed: Option<u64>) -> Self {
        Self {
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
            transaction_counter: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.transaction_counter += 1;
        format!("tx_{:012}", self.transaction_counter)
    }

    fn timestamp_at(&mut self, hour: u8) -> String {
        let day = Utc::now().date_naive() - Duration::days(self.rng.gen_range(0..30));
        let minute = self.rng.gen_range(0..60);
        day.and_hms_opt(hour as u32, minute, 0)
            .map(|t| t.and_utc().to_rfc3339())
            .unwrap_or_default()
    }

    /// Generate a random legitimate transaction
    fn generate_legitimate(&mut self) -> SampleTransaction {
        let hour = self.rng.gen_range(7..23);
        SampleTransaction {
            transaction_id: self.next_id(),
            timestamp: self.timestamp_at(hour),
            amount: round_cents(self.rng.gen_range(10.0..500.0)),
            hour,
            merchant_category: self
                .random_choice(&["5411", "5812", "5541", "5912", "5999"])
                .to_string(),
            country: self.random_choice(&["US", "UK", "CA", "DE", "FR"]).to_string(),
            is_international: self.rng.gen_bool(0.1),
            is_online: self.rng.gen_bool(0.6),
            card_present: self.rng.gen_bool(0.4),
            tx_count_last_hour: self.rng.gen_range(0..3),
            tx_amount_last_24h: round_cents(self.rng.gen_range(0.0..2000.0)),
            distance_from_last_tx: round_cents(self.rng.gen_range(0.0..100.0)),
            account_age_days: self.rng.gen_range(30..1000),
        }
    }

    /// Generate a suspicious transaction
    fn generate_suspicious(&mut self) -> SampleTransaction {
        // Night time
        let hour = self.rng.gen_range(0..6);
        SampleTransaction {
            transaction_id: self.next_id(),
            timestamp: self.timestamp_at(hour),
            amount: round_cents(self.rng.gen_range(1000.0..10000.0)),
            hour,
            merchant_category: self.random_choice(&["5999", "5912"]).to_string(),
            country: self.random_choice(&["RU", "CN", "US"]).to_string(),
            is_international: true,
            is_online: true,
            card_present: false,
            tx_count_last_hour: self.rng.gen_range(5..15),
            tx_amount_last_24h: round_cents(self.rng.gen_range(5000.0..50000.0)),
            distance_from_last_tx: round_cents(self.rng.gen_range(500.0..5000.0)),
            account_age_days: self.rng.gen_range(1..30),
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn main() -> anyhow::Result<()> {
    // Log to stderr so stdout can carry the CSV
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sample_transactions=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let count: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1_f64)
        .clamp(0.0, 1.0);
    let output = args.get(3).map(|s| s.as_str()).unwrap_or("-");
    let seed: Option<u64> = args.get(4).and_then(|s| s.parse().ok());

    info!(
        count = count,
        fraud_rate = fraud_rate,
        output = %output,
        seed = ?seed,
        "Generating sample transactions"
    );

    let sink: Box<dyn Write> = if output == "-" {
        Box::new(std::io::stdout().lock())
    } else {
        Box::new(
            std::fs::File::create(output)
                .with_context(|| format!("Failed to create {}", output))?,
        )
    };
    let mut writer = csv::Writer::from_writer(sink);

    let mut generator = TransactionGenerator::new(seed);
    let mut legitimate_count = 0;
    let mut suspicious_count = 0;

    for _ in 0..count {
        let transaction = if generator.rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()
        };
        writer.serialize(&transaction)?;
    }
    writer.flush()?;

    info!(
        "Completed! Wrote {} transactions ({} legitimate, {} suspicious)",
        count, legitimate_count, suspicious_count
    );

    Ok(())
}
