use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A simulated customer's situation and goal. Immutable reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub context: String,
    pub goal: String,
    pub expected_info: Vec<String>,
}

/// Communication-style profile for the simulated user. The attributes are
/// opaque to the harness and only flow into the user simulator's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub tone: String,
    pub technical_literacy: String,
    pub formality: String,
    pub trust_level: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("scenario not found: {0}")]
    UnknownScenario(String),
    #[error("persona not found: {0}")]
    UnknownPersona(String),
    #[error("catalog selection is empty")]
    Empty,
}

/// Immutable scenario and persona reference data, passed explicitly into the
/// simulator instead of living as global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    scenarios: Vec<Scenario>,
    personas: Vec<Persona>,
}

impl Catalog {
    pub fn new(scenarios: Vec<Scenario>, personas: Vec<Persona>) -> Self {
        Self {
            scenarios,
            personas,
        }
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn persona(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Restrict the catalog to the named ids; `None` keeps the full list.
    /// Ids that match nothing simply drop out, as in the batch endpoint.
    pub fn filtered(&self, scenario_ids: Option<&[String]>, persona_ids: Option<&[String]>) -> Self {
        let scenarios = match scenario_ids {
            Some(ids) => self
                .scenarios
                .iter()
                .filter(|s| ids.iter().any(|id| *id == s.id))
                .cloned()
                .collect(),
            None => self.scenarios.clone(),
        };
        let personas = match persona_ids {
            Some(ids) => self
                .personas
                .iter()
                .filter(|p| ids.iter().any(|id| *id == p.id))
                .cloned()
                .collect(),
            None => self.personas.clone(),
        };
        Self::new(scenarios, personas)
    }

    pub fn sample_pair<R: Rng>(&self, rng: &mut R) -> Result<(&Scenario, &Persona), CatalogError> {
        if self.scenarios.is_empty() || self.personas.is_empty() {
            return Err(CatalogError::Empty);
        }
        let scenario = &self.scenarios[rng.gen_range(0..self.scenarios.len())];
        let persona = &self.personas[rng.gen_range(0..self.personas.len())];
        Ok((scenario, persona))
    }

    /// The stock e-commerce support catalog: 20 scenarios, 10 personas.
    pub fn builtin() -> Self {
        Self::new(builtin_scenarios(), builtin_personas())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn scenario(id: &str, kind: &str, context: &str, goal: &str, expected: &[&str]) -> Scenario {
    Scenario {
        id: id.to_string(),
        kind: kind.to_string(),
        context: context.to_string(),
        goal: goal.to_string(),
        expected_info: expected.iter().map(|s| s.to_string()).collect(),
    }
}

fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        scenario(
            "order_delay",
            "order_delay",
            "Order placed 2 weeks ago, expected delivery was last week, still not received",
            "Get information about delayed order and resolution",
            &["order_id", "tracking_number", "estimated_delivery"],
        ),
        scenario(
            "wrong_item",
            "wrong_item",
            "Received wrong item in package - ordered blue shirt size M, got red pants size L",
            "Get refund or replacement for wrong item",
            &["order_id", "return_process"],
        ),
        scenario(
            "refund_request",
            "refund_request",
            "Product doesn't meet expectations, want to return and get refund",
            "Initiate refund process",
            &["refund_policy", "return_instructions"],
        ),
        scenario(
            "no_order_id",
            "refund_request",
            "Want to return item but can't find order confirmation email",
            "Get refund without having order ID readily available",
            &["alternative_lookup_method"],
        ),
        scenario(
            "account_locked",
            "account_locked",
            "Cannot log into account, getting 'account locked' error",
            "Regain access to account",
            &["unlock_process", "security_verification"],
        ),
        scenario(
            "billing_dispute",
            "billing_dispute",
            "Charged twice for same order, credit card shows duplicate charges",
            "Get duplicate charge refunded",
            &["charge_investigation", "refund_timeline"],
        ),
        scenario(
            "subscription_cancel",
            "subscription_cancellation",
            "Want to cancel monthly subscription but can't find cancellation option",
            "Cancel subscription successfully",
            &["cancellation_confirmation", "final_billing_date"],
        ),
        scenario(
            "warranty_claim",
            "warranty_claim",
            "Product stopped working after 3 months, should be under warranty",
            "File warranty claim and get replacement or repair",
            &["warranty_coverage", "claim_process"],
        ),
        scenario(
            "cross_sell",
            "product_inquiry",
            "Looking for recommendations for compatible accessories",
            "Get product recommendations",
            &["product_suggestions"],
        ),
        scenario(
            "policy_complaint",
            "complaint",
            "Unhappy with return policy - only 14 days seems too short",
            "Express dissatisfaction and potentially get exception",
            &["policy_explanation", "exception_possibility"],
        ),
        scenario(
            "shipping_damage",
            "damaged_item",
            "Package arrived damaged, item inside is broken",
            "Get replacement or refund for damaged item",
            &["damage_claim_process", "photo_requirements"],
        ),
        scenario(
            "promo_code_issue",
            "promo_code",
            "Promo code not applying at checkout, getting error message",
            "Get promo code to work or receive discount",
            &["promo_validation", "alternative_solution"],
        ),
        scenario(
            "size_exchange",
            "exchange",
            "Item doesn't fit, want to exchange for different size",
            "Exchange item for correct size",
            &["exchange_process", "size_availability"],
        ),
        scenario(
            "payment_failed",
            "payment_issue",
            "Order keeps getting declined, payment method should be valid",
            "Successfully complete purchase",
            &["payment_troubleshooting"],
        ),
        scenario(
            "gift_return",
            "gift_return",
            "Received item as gift but want to return, don't have receipt",
            "Return gift item without receipt",
            &["gift_return_policy", "store_credit_option"],
        ),
        scenario(
            "international_shipping",
            "shipping_inquiry",
            "Want to know if you ship to specific country and customs fees",
            "Get international shipping information",
            &["shipping_availability", "customs_info"],
        ),
        scenario(
            "loyalty_points",
            "loyalty_program",
            "Points from recent purchase not showing in account",
            "Get missing loyalty points credited",
            &["points_investigation", "crediting_timeline"],
        ),
        scenario(
            "bulk_order",
            "bulk_inquiry",
            "Want to place large order for company, need bulk pricing",
            "Get bulk pricing and ordering information",
            &["bulk_discount", "business_account_info"],
        ),
        scenario(
            "product_recall",
            "product_recall",
            "Heard about product recall, want to know if my item is affected",
            "Get recall information and next steps",
            &["recall_status", "return_instructions"],
        ),
        scenario(
            "password_reset",
            "password_reset",
            "Forgot password, reset email not arriving",
            "Reset password and regain account access",
            &["alternative_reset_method", "email_troubleshooting"],
        ),
    ]
}

fn persona(id: &str, tone: &str, literacy: &str, formality: &str, trust: &str) -> Persona {
    Persona {
        id: id.to_string(),
        tone: tone.to_string(),
        technical_literacy: literacy.to_string(),
        formality: formality.to_string(),
        trust_level: trust.to_string(),
    }
}

fn builtin_personas() -> Vec<Persona> {
    vec![
        persona("calm_polite", "calm", "intermediate", "polite", "trusting"),
        persona("frustrated_impatient", "frustrated", "low", "casual", "cautious"),
        persona("angry_demanding", "angry", "intermediate", "casual", "distrustful"),
        persona("confused_anxious", "anxious", "low", "polite", "cautious"),
        persona("professional_formal", "neutral", "high", "formal", "cautious"),
        persona("casual_friendly", "friendly", "intermediate", "casual", "trusting"),
        persona("sarcastic_skeptical", "sarcastic", "high", "casual", "distrustful"),
        persona("urgent_stressed", "urgent", "intermediate", "casual", "neutral"),
        persona("elderly_patient", "patient", "low", "formal", "trusting"),
        persona("technical_precise", "neutral", "expert", "formal", "neutral"),
    ]
}
