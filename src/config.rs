// Command-line flags, settings file/env, and secrets from the environment
use clap::{ArgAction, Parser};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::api::DiscoveryFilter;
use crate::error::BotError;
use crate::indicators::IndicatorPeriods;
use crate::models::Interval;
use crate::strategy::SignalConfig;

const ENV_PREFIX: &str = "SIGNALBOT";

#[derive(Debug, Clone, Parser)]
#[command(name = "signalbot", version, about = "Technical-analysis signal bot for Binance USD-M futures")]
pub struct Cli {
    /// Interval to perform TA: 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 1d
    #[arg(long)]
    pub interval: Interval,

    /// Initial balance to simulate trading (ignored when --trade is set)
    #[arg(long, default_value_t = 1000.0)]
    pub balance: f64,

    /// Maximum concurrently open positions
    #[arg(long = "max-positions", default_value_t = 5)]
    pub max_positions: usize,

    /// Send signal notifications on Telegram
    #[arg(long, default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub signals: bool,

    /// Simulate opening positions when signals trigger
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub simulate: bool,

    /// Trade signals on the Binance USD-M account
    #[arg(long, default_value_t = false, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub trade: bool,

    /// Send notifications to the development bot (DEV_TELEGRAM_* variables)
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub dev: bool,

    /// Settings file, without extension (toml, yaml or json)
    #[arg(long, default_value = "Settings")]
    pub settings: String,

    /// Price alerts file
    #[arg(long, default_value = "alerts.json")]
    pub alerts: PathBuf,
}

impl Cli {
    pub fn validate(&self) -> Result<(), BotError> {
        if self.max_positions == 0 {
            return Err(BotError::Config("--max-positions must be at least 1".to_string()));
        }
        if !self.trade && !(self.balance.is_finite() && self.balance > 0.0) {
            return Err(BotError::Config("--balance must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether actionable signals open positions at all
    pub fn opens_positions(&self) -> bool {
        self.simulate || self.trade
    }
}

/// Tunables loaded from the settings file and `SIGNALBOT_*` variables
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Closes kept per symbol; also the backfill depth
    pub buffer_len: usize,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub quote_asset: String,
    pub excluded_base_assets: Vec<String>,
    /// Fraction of the wallet balance held back in live mode
    pub balance_margin_pct: f64,
    pub backfill_requests_per_minute: u32,
    #[serde(default)]
    pub indicators: IndicatorPeriods,
    #[serde(default)]
    pub signal: SignalConfig,
}

impl Settings {
    /// Defaults, then the optional settings file, then the environment
    pub fn load(path: &str) -> Result<Self, BotError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: &str, prefix: &str) -> Result<Self, BotError> {
        let settings: Settings = Config::builder()
            .set_default("buffer_len", 200)?
            .set_default("stop_loss_pct", 0.01)?
            .set_default("take_profit_pct", 0.04)?
            .set_default("quote_asset", "USDT")?
            .set_default("excluded_base_assets", vec!["1000BTTC"])?
            .set_default("balance_margin_pct", 0.05)?
            .set_default("backfill_requests_per_minute", 1200)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("excluded_base_assets")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), BotError> {
        let need = self.indicators.min_closes();
        if self.buffer_len < need {
            return Err(BotError::Config(format!(
                "buffer_len {} is shorter than the {} closes the indicators need",
                self.buffer_len, need
            )));
        }

        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(BotError::Config(format!("{} must be in (0, 1), got {}", name, value)));
            }
        }

        if !(0.0..1.0).contains(&self.balance_margin_pct) {
            return Err(BotError::Config(format!(
                "balance_margin_pct must be in [0, 1), got {}",
                self.balance_margin_pct
            )));
        }

        if self.backfill_requests_per_minute == 0 {
            return Err(BotError::Config(
                "backfill_requests_per_minute must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn discovery_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            quote_asset: self.quote_asset.clone(),
            excluded_base_assets: self.excluded_base_assets.clone(),
        }
    }

    /// Wallet balance minus the safety margin
    pub fn tradable_balance(&self, wallet_balance: f64) -> f64 {
        wallet_balance - wallet_balance * self.balance_margin_pct
    }
}

#[derive(Debug, Clone)]
pub struct TelegramCredentials {
    pub token: String,
    pub chat_id: i64,
}

/// Credentials read from the environment (`.env` is loaded by main)
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub binance_api_key: Option<String>,
    pub binance_secret_key: Option<String>,
    pub telegram: Option<TelegramCredentials>,
}

impl Secrets {
    pub fn from_env(dev: bool) -> Self {
        Self::from_lookup(dev, |key| std::env::var(key).ok())
    }

    fn from_lookup(dev: bool, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let (token_key, chat_key) = if dev {
            ("DEV_TELEGRAM_APITOKEN", "DEV_TELEGRAM_CHATID")
        } else {
            ("TELEGRAM_APITOKEN", "TELEGRAM_CHATID")
        };

        let telegram = match (non_empty(token_key), non_empty(chat_key)) {
            (Some(token), Some(chat)) => match chat.trim().parse::<i64>() {
                Ok(chat_id) => Some(TelegramCredentials { token, chat_id }),
                Err(_) => {
                    tracing::warn!("{} is not a numeric chat id, Telegram disabled", chat_key);
                    None
                }
            },
            _ => None,
        };

        Self {
            binance_api_key: non_empty("BINANCE_APIKEY"),
            binance_secret_key: non_empty("BINANCE_SECRETKEY"),
            telegram,
        }
    }

    pub fn has_binance_keys(&self) -> bool {
        self.binance_api_key.is_some() && self.binance_secret_key.is_some()
    }
}
