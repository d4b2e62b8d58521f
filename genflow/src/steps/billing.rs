//! Pre-charge and settlement steps.
//!
//! `billing-prepare` debits the caller before generation and leaves a note
//! in the scratch store; `billing-finalize` reads it after the run and
//! either confirms the charge or refunds it. Balances live behind the
//! [`BalanceLedger`] service registered as [`BILLING_SERVICE`].

use super::Step;
use crate::context::{HintPosition, StepContext};
use crate::core::{StepPhase, StepSignal};
use crate::pipeline::StepDefinition;
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Service name under which the ledger is registered.
pub const BILLING_SERVICE: &str = "billing";

/// Config group both billing steps read.
pub const BILLING_GROUP: &str = "billing";

const STORE_CHARGED: &str = "billing:charged";
const STORE_AMOUNT: &str = "billing:amount";
const STORE_USER: &str = "billing:user";
const STORE_CURRENCY: &str = "billing:currency";

/// Balance storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Returns a user's balance in a currency. Unknown users have 0.
    async fn balance(&self, user: u64, currency: &str) -> anyhow::Result<i64>;

    /// Adds `delta` (negative to debit) and returns the new balance.
    async fn adjust(&self, user: u64, currency: &str, delta: i64) -> anyhow::Result<i64>;
}

/// A ledger kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: DashMap<(u64, String), i64>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a balance.
    #[must_use]
    pub fn with_balance(self, user: u64, currency: impl Into<String>, amount: i64) -> Self {
        self.balances.insert((user, currency.into()), amount);
        self
    }

    /// Returns a balance without going through the trait.
    #[must_use]
    pub fn get(&self, user: u64, currency: &str) -> i64 {
        self.balances
            .get(&(user, currency.to_string()))
            .map_or(0, |entry| *entry.value())
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn balance(&self, user: u64, currency: &str) -> anyhow::Result<i64> {
        Ok(self.get(user, currency))
    }

    async fn adjust(&self, user: u64, currency: &str, delta: i64) -> anyhow::Result<i64> {
        let mut entry = self.balances.entry((user, currency.to_string())).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }
}

/// Billing settings, merged from global config and the channel override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Price of one generation; 0 or less means free.
    pub cost: i64,
    /// Currency key in the ledger.
    pub currency: String,
    /// Currency name shown to users.
    pub currency_label: String,
    /// Refund the charge when generation fails.
    pub refund_on_fail: bool,
    /// Hint after a successful pre-charge.
    pub msg_pre_charge: String,
    /// Error when the balance is too low.
    pub msg_insufficient_balance: String,
    /// Hint after a successful generation.
    pub msg_success: String,
    /// Hint after a refund.
    pub msg_refunded: String,
    /// Hint when the refund itself failed.
    pub msg_refund_failed: String,
    /// Hint when a failed generation is not refunded.
    pub msg_no_refund: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            cost: 0,
            currency: "default".to_string(),
            currency_label: "points".to_string(),
            refund_on_fail: true,
            msg_pre_charge: "Charged {cost} {label}, balance {balance} {label}".to_string(),
            msg_insufficient_balance:
                "Insufficient balance: {cost} {label} required, balance {balance} {label}"
                    .to_string(),
            msg_success: "Generation succeeded, spent {cost} {label}, balance {balance} {label}"
                .to_string(),
            msg_refunded: "Generation failed, refunded {cost} {label}, balance {balance} {label}"
                .to_string(),
            msg_refund_failed: "Generation failed, refund failed: {error}".to_string(),
            msg_no_refund: "Generation failed, {cost} {label} charged (no refund)".to_string(),
        }
    }
}

/// Message kinds with a configurable template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingMessage {
    /// After the pre-charge.
    PreCharge,
    /// Balance too low.
    InsufficientBalance,
    /// Generation succeeded.
    Success,
    /// Charge refunded.
    Refunded,
    /// Refund failed.
    RefundFailed,
    /// No refund configured.
    NoRefund,
}

impl BillingConfig {
    /// Returns the template for a message; blank templates fall back to the
    /// built-in text.
    #[must_use]
    pub fn template(&self, message: BillingMessage) -> String {
        let pick = |configured: &str, fallback: String| {
            if configured.trim().is_empty() {
                fallback
            } else {
                configured.to_string()
            }
        };
        let defaults = Self::default();
        match message {
            BillingMessage::PreCharge => pick(&self.msg_pre_charge, defaults.msg_pre_charge),
            BillingMessage::InsufficientBalance => {
                pick(&self.msg_insufficient_balance, defaults.msg_insufficient_balance)
            }
            BillingMessage::Success => pick(&self.msg_success, defaults.msg_success),
            BillingMessage::Refunded => pick(&self.msg_refunded, defaults.msg_refunded),
            BillingMessage::RefundFailed => pick(&self.msg_refund_failed, defaults.msg_refund_failed),
            BillingMessage::NoRefund => pick(&self.msg_no_refund, defaults.msg_no_refund),
        }
    }

    fn label(&self) -> &str {
        if self.currency_label.trim().is_empty() {
            "points"
        } else {
            &self.currency_label
        }
    }
}

/// Values substituted into a message template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateVars<'a> {
    /// `{cost}`.
    pub cost: Option<i64>,
    /// `{balance}`; when unknown, the whole balance fragment is removed.
    pub balance: Option<i64>,
    /// `{label}`.
    pub label: Option<&'a str>,
    /// `{error}`.
    pub error: Option<&'a str>,
}

/// Matches ", balance {balance} {label}" (and the CJK form) in a template.
static BALANCE_FRAGMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)[,，]?\s*(?:balance|余额)\s*\{balance\}\s*\{label\}").ok()
});

/// Renders a message template.
#[must_use]
pub fn render_template(template: &str, vars: TemplateVars<'_>) -> String {
    let mut result = template.to_string();
    if let Some(cost) = vars.cost {
        result = result.replace("{cost}", &cost.to_string());
    }
    match vars.balance {
        Some(balance) => result = result.replace("{balance}", &balance.to_string()),
        None => {
            if let Some(re) = BALANCE_FRAGMENT.as_ref() {
                result = re.replace_all(&result, "").into_owned();
            }
        }
    }
    if let Some(label) = vars.label {
        result = result.replace("{label}", label);
    }
    if let Some(error) = vars.error {
        result = result.replace("{error}", error);
    }
    result
}

/// Debits the caller before generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingPrepareStep;

impl BillingPrepareStep {
    /// Step name.
    pub const NAME: &'static str = "billing-prepare";

    /// Returns the step declaration.
    #[must_use]
    pub fn definition() -> StepDefinition {
        StepDefinition::new(Self::NAME, Arc::new(Self))
            .with_label("Pre-charge")
            .with_category("billing")
            .with_phase(StepPhase::Prepare)
            .with_config_group(BILLING_GROUP)
    }

    fn fail(ctx: &StepContext, diagnostic: serde_json::Value, message: String) -> StepSignal {
        ctx.record_diagnostic(diagnostic);
        StepSignal::error(message)
    }
}

#[async_trait]
impl Step for BillingPrepareStep {
    async fn execute(&self, ctx: &StepContext) -> StepSignal {
        let config: BillingConfig = match ctx.config_as::<BillingConfig>().await {
            Ok(config) => config,
            Err(e) => return StepSignal::error(format!("invalid billing config: {e}")),
        };

        if config.cost <= 0 {
            ctx.record_diagnostic(json!({"skipped": true, "reason": "free channel", "cost": config.cost}));
            return StepSignal::proceed();
        }

        let Some(user) = ctx.uid() else {
            return Self::fail(
                ctx,
                json!({"error": true, "reason": "no user id"}),
                "Unable to identify the user, bind an account first".to_string(),
            );
        };

        let Some(ledger) = ctx.service::<Arc<dyn BalanceLedger>>(BILLING_SERVICE) else {
            return Self::fail(
                ctx,
                json!({"error": true, "reason": "ledger unavailable"}),
                format!("billing service '{BILLING_SERVICE}' is not registered"),
            );
        };

        let label = config.label();
        let balance = match ledger.balance(user, &config.currency).await {
            Ok(balance) => balance,
            Err(e) => {
                return Self::fail(
                    ctx,
                    json!({"error": true, "message": e.to_string()}),
                    format!("balance lookup failed: {e}"),
                )
            }
        };

        if balance < config.cost {
            let message = render_template(
                &config.template(BillingMessage::InsufficientBalance),
                TemplateVars {
                    cost: Some(config.cost),
                    balance: Some(balance),
                    label: Some(label),
                    error: None,
                },
            );
            return Self::fail(
                ctx,
                json!({
                    "error": true,
                    "reason": "insufficient balance",
                    "balance": balance,
                    "required": config.cost,
                    "currency": config.currency,
                }),
                message,
            );
        }

        let new_balance = match ledger.adjust(user, &config.currency, -config.cost).await {
            Ok(balance) => balance,
            Err(e) => {
                return Self::fail(
                    ctx,
                    json!({"error": true, "message": e.to_string()}),
                    format!("balance update failed: {e}"),
                )
            }
        };

        let stored = ctx
            .store_set(STORE_CHARGED, json!(true))
            .and_then(|()| ctx.store_set(STORE_AMOUNT, json!(config.cost)))
            .and_then(|()| ctx.store_set(STORE_USER, json!(user)))
            .and_then(|()| ctx.store_set(STORE_CURRENCY, json!(config.currency)));
        if let Err(e) = stored {
            return StepSignal::fail(e);
        }

        ctx.add_hint(
            render_template(
                &config.template(BillingMessage::PreCharge),
                TemplateVars {
                    cost: Some(config.cost),
                    balance: Some(new_balance),
                    label: Some(label),
                    error: None,
                },
            ),
            HintPosition::Before,
        );
        ctx.record_diagnostic(json!({
            "charged": config.cost,
            "user": user,
            "currency": config.currency,
            "balance_before": balance,
            "balance_after": new_balance,
        }));
        debug!(user, cost = config.cost, currency = %config.currency, "Pre-charged");

        StepSignal::proceed()
    }
}

/// Confirms or refunds the pre-charge after the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingFinalizeStep;

impl BillingFinalizeStep {
    /// Step name.
    pub const NAME: &'static str = "billing-finalize";

    /// Returns the step declaration.
    #[must_use]
    pub fn definition() -> StepDefinition {
        StepDefinition::new(Self::NAME, Arc::new(Self))
            .with_label("Settlement")
            .with_category("billing")
            .with_phase(StepPhase::Finalize)
            .with_config_group(BILLING_GROUP)
    }
}

#[async_trait]
impl Step for BillingFinalizeStep {
    async fn execute(&self, ctx: &StepContext) -> StepSignal {
        if ctx.store_get(STORE_CHARGED) != Some(json!(true)) {
            return StepSignal::proceed();
        }

        let config: BillingConfig = ctx.config_as::<BillingConfig>().await.unwrap_or_default();
        let label = config.label();
        let amount = ctx
            .store_get(STORE_AMOUNT)
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        let currency = ctx
            .store_get(STORE_CURRENCY)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| config.currency.clone());
        let Some(user) = ctx.store_get(STORE_USER).and_then(|v| v.as_u64()) else {
            return StepSignal::error("billing record has no user");
        };
        let ledger = ctx.service::<Arc<dyn BalanceLedger>>(BILLING_SERVICE);

        if ctx.has_output() {
            let balance = match &ledger {
                Some(ledger) => ledger.balance(user, &currency).await.ok(),
                None => None,
            };
            ctx.add_hint(
                render_template(
                    &config.template(BillingMessage::Success),
                    TemplateVars {
                        cost: Some(amount),
                        balance,
                        label: Some(label),
                        error: None,
                    },
                ),
                HintPosition::After,
            );
            ctx.record_diagnostic(json!({
                "confirmed": amount,
                "user": user,
                "currency": currency,
                "current_balance": balance,
            }));
            return StepSignal::proceed();
        }

        if !config.refund_on_fail {
            ctx.add_hint(
                render_template(
                    &config.template(BillingMessage::NoRefund),
                    TemplateVars {
                        cost: Some(amount),
                        balance: None,
                        label: Some(label),
                        error: None,
                    },
                ),
                HintPosition::After,
            );
            ctx.record_diagnostic(json!({
                "no_refund": true,
                "charged": amount,
                "user": user,
                "currency": currency,
            }));
            return StepSignal::proceed();
        }

        let refund = match &ledger {
            Some(ledger) => ledger.adjust(user, &currency, amount).await,
            None => Err(anyhow::anyhow!("billing service '{BILLING_SERVICE}' is not registered")),
        };

        match refund {
            Ok(balance) => {
                ctx.add_hint(
                    render_template(
                        &config.template(BillingMessage::Refunded),
                        TemplateVars {
                            cost: Some(amount),
                            balance: Some(balance),
                            label: Some(label),
                            error: None,
                        },
                    ),
                    HintPosition::After,
                );
                ctx.record_diagnostic(json!({
                    "refunded": amount,
                    "user": user,
                    "currency": currency,
                    "current_balance": balance,
                }));
            }
            Err(e) => {
                warn!(user, amount, error = %e, "Refund failed");
                let error = e.to_string();
                ctx.add_hint(
                    render_template(
                        &config.template(BillingMessage::RefundFailed),
                        TemplateVars {
                            error: Some(&error),
                            ..TemplateVars::default()
                        },
                    ),
                    HintPosition::After,
                );
                ctx.record_diagnostic(json!({
                    "refund_failed": true,
                    "amount": amount,
                    "error": error,
                }));
            }
        }

        StepSignal::proceed()
    }
}

/// Returns both billing step declarations.
#[must_use]
pub fn billing_steps() -> Vec<StepDefinition> {
    vec![BillingPrepareStep::definition(), BillingFinalizeStep::definition()]
}
