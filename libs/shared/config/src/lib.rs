use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStoreBackend {
    Supabase,
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub slot_store_backend: SlotStoreBackend,
    pub hold_duration_seconds: u64,
    pub card_read_timeout_ms: u64,
    pub upi_qr_validity_seconds: u64,
    pub upi_poll_interval_seconds: u64,
    pub upi_gateway_url: String,
    pub api_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            slot_store_backend: SlotStoreBackend::Memory,
            hold_duration_seconds: 90,
            card_read_timeout_ms: 45_000,
            upi_qr_validity_seconds: 180,
            upi_poll_interval_seconds: 4,
            upi_gateway_url: String::new(),
            api_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let supabase_url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_URL not set, using empty value");
                String::new()
            });
        let supabase_anon_key = env::var("SUPABASE_ANON_PUBLIC_KEY")
            .unwrap_or_else(|_| {
                warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                String::new()
            });

        let supabase_ready = !supabase_url.is_empty() && !supabase_anon_key.is_empty();
        let slot_store_backend = match env::var("SLOT_STORE_BACKEND").as_deref() {
            Ok("memory") => SlotStoreBackend::Memory,
            Ok("supabase") => SlotStoreBackend::Supabase,
            Ok(other) => {
                warn!("Unknown SLOT_STORE_BACKEND '{}', falling back", other);
                if supabase_ready { SlotStoreBackend::Supabase } else { SlotStoreBackend::Memory }
            }
            Err(_) if supabase_ready => SlotStoreBackend::Supabase,
            Err(_) => {
                warn!("Supabase not configured, slot claims will be kept in memory");
                SlotStoreBackend::Memory
            }
        };

        let config = Self {
            supabase_url,
            supabase_anon_key,
            slot_store_backend,
            hold_duration_seconds: parse_or("HOLD_DURATION_SECONDS", defaults.hold_duration_seconds),
            card_read_timeout_ms: parse_or("CARD_READ_TIMEOUT_MS", defaults.card_read_timeout_ms),
            upi_qr_validity_seconds: parse_or("UPI_QR_VALIDITY_SECONDS", defaults.upi_qr_validity_seconds),
            upi_poll_interval_seconds: parse_or("UPI_POLL_INTERVAL_SECONDS", defaults.upi_poll_interval_seconds),
            upi_gateway_url: env::var("UPI_GATEWAY_URL")
                .unwrap_or_else(|_| {
                    warn!("UPI_GATEWAY_URL not set, UPI collection disabled");
                    String::new()
                }),
            api_port: parse_or("API_PORT", defaults.api_port),
        };

        if !config.is_configured() && config.slot_store_backend == SlotStoreBackend::Supabase {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
    }

    pub fn is_upi_configured(&self) -> bool {
        !self.upi_gateway_url.is_empty()
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_secs(self.hold_duration_seconds)
    }

    pub fn card_read_timeout(&self) -> Duration {
        Duration::from_millis(self.card_read_timeout_ms)
    }

    pub fn upi_qr_validity(&self) -> Duration {
        Duration::from_secs(self.upi_qr_validity_seconds)
    }

    pub fn upi_poll_interval(&self) -> Duration {
        Duration::from_secs(self.upi_poll_interval_seconds)
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
