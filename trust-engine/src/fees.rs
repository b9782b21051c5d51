//! Settlement and fee calculation

use crate::config::FeeConfig;
use crate::types::TransactionStatus;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Fees for one routed payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Gross amount
    pub amount: Decimal,
    /// ISO 4217 currency
    pub currency: String,
    /// Processor the rate was taken from
    pub processor: String,
    /// Rate applied by the processor
    pub processing_rate: Decimal,
    /// Processor fee
    pub processing_fee: Decimal,
    /// Platform commission
    pub platform_fee: Decimal,
    /// Processor fee plus platform commission
    pub total_fees: Decimal,
    /// Amount minus fees
    pub net_amount: Decimal,
}

/// Fees plus the expected settlement date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEstimate {
    /// Fee breakdown
    pub fees: FeeBreakdown,
    /// Expected settlement day
    pub settlement_date: NaiveDate,
}

/// Decimal places in a currency's minor unit
pub fn minor_units(currency: &str) -> u32 {
    match currency {
        "JPY" | "KRW" => 0,
        _ => 2,
    }
}

/// `days` business days after `from`, skipping Saturdays and Sundays
pub fn add_business_days(from: NaiveDate, days: u32) -> NaiveDate {
    let mut date = from;
    let mut added = 0;
    while added < days {
        date = date + Duration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            added += 1;
        }
    }
    date
}

/// Fee calculator over a static rate table
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    config: FeeConfig,
}

impl FeeCalculator {
    /// Create new fee calculator
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Normalised currency code, or `PolicyMisconfiguration` if unsupported
    pub fn ensure_supported(&self, currency: &str) -> Result<String> {
        let code = currency.trim().to_uppercase();
        if self.config.supported_currencies.iter().any(|c| c.eq_ignore_ascii_case(&code)) {
            Ok(code)
        } else {
            Err(Error::PolicyMisconfiguration(format!(
                "unsupported currency: {}",
                currency
            )))
        }
    }

    /// Rate for `processor`, falling back to the default rate
    pub fn processor_rate(&self, processor: &str) -> Decimal {
        self.config
            .processor_rates
            .get(&processor.to_lowercase())
            .copied()
            .unwrap_or(self.config.default_processor_rate)
    }

    /// Fees for `amount` in `currency` through `processor`
    pub fn calculate(&self, amount: Decimal, currency: &str, processor: &str) -> Result<FeeBreakdown> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        let currency = self.ensure_supported(currency)?;
        let dp = minor_units(&currency);
        let round = |value: Decimal| value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);

        let processing_rate = self.processor_rate(processor);
        let processing_fee = round(amount * processing_rate);
        let platform_fee = round(amount * self.config.platform_rate);
        let total_fees = processing_fee + platform_fee;

        Ok(FeeBreakdown {
            amount,
            currency,
            processor: processor.to_string(),
            processing_rate,
            processing_fee,
            platform_fee,
            total_fees,
            net_amount: amount - total_fees,
        })
    }

    /// Settlement day for a payment in `status`, counted from `as_of`
    pub fn settlement_date(&self, status: TransactionStatus, as_of: DateTime<Utc>) -> NaiveDate {
        let days = if status == TransactionStatus::Completed {
            self.config.completed_settlement_days
        } else {
            self.config.pending_settlement_days
        };
        add_business_days(as_of.date_naive(), days)
    }

    /// Fees plus settlement date
    pub fn estimate(
        &self,
        amount: Decimal,
        currency: &str,
        processor: &str,
        status: TransactionStatus,
        as_of: DateTime<Utc>,
    ) -> Result<SettlementEstimate> {
        Ok(SettlementEstimate {
            fees: self.calculate(amount, currency, processor)?,
            settlement_date: self.settlement_date(status, as_of),
        })
    }
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new(FeeConfig::default())
    }
}
