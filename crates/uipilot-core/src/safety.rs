//! Payment-intent safety interlock.
//!
//! Every candidate passes through [`SafetyGuard::evaluate`] before the
//! execution driver is called. Configuration can add terms to the denylist
//! but cannot remove the built-in ones or turn the guard off.

use crate::action::ActionCandidate;
use crate::collaborator::ScreenContext;
use crate::config::SafetyConfig;
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Labels that commit money when activated.
const COMMIT_LABELS: &[&str] = &[
    "pay",
    "pay now",
    "confirm payment",
    "submit payment",
    "make payment",
    "authorize payment",
    "place order",
    "confirm order",
    "complete order",
    "complete purchase",
    "confirm purchase",
    "purchase",
    "buy now",
    "subscribe now",
];

/// Fields that collect payment card data.
const CARD_FIELDS: &[&str] = &[
    "card number",
    "credit card",
    "debit card",
    "cvv",
    "cvc",
    "security code",
    "expiration date",
    "expiry date",
    "cardholder name",
];

/// Screen text that means a charge is about to be confirmed.
const CHARGE_LANGUAGE: &[&str] = &[
    "you will be charged",
    "confirm payment",
    "amount due",
    "total due",
    "authorize payment",
    "payment method",
];

static CARD_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("valid card number regex"));

/// Which family of heuristics fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentSignal {
    CommitLabel,
    CardEntryField,
    ChargeConfirmation,
    CardNumberInput,
    /// The inference service judged the screen to be a payment screen.
    PaymentScreen,
}

/// Verdict of the safety interlock for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SafetyVerdict {
    Clear,
    Blocked {
        signal: PaymentSignal,
        matched: String,
        reason: String,
    },
}

impl SafetyVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

struct Denylist {
    signal: PaymentSignal,
    pattern: Regex,
}

impl Denylist {
    fn compile(signal: PaymentSignal, terms: &[String]) -> Self {
        let alternatives = terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| regex::escape(t).replace(r"\ ", r"\s+").replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        // Terms may start or end with punctuation, where `\b` never matches.
        let pattern = RegexBuilder::new(&format!(r"(?:^|\W)({alternatives})(?:\W|$)"))
            .case_insensitive(true)
            .build()
            .expect("escaped denylist terms always compile");
        Self { signal, pattern }
    }

    fn find<'a>(&self, haystack: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(haystack)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

/// Evaluates candidates and screen context against payment-intent heuristics.
pub struct SafetyGuard {
    commit_labels: Denylist,
    card_fields: Denylist,
    charge_language: Denylist,
}

impl SafetyGuard {
    /// Builds a guard with the built-in denylist extended by `config.extra_terms`.
    pub fn new(config: &SafetyConfig) -> Self {
        let owned = |terms: &[&str]| terms.iter().map(|t| t.to_string()).collect::<Vec<_>>();

        let mut commit = owned(COMMIT_LABELS);
        commit.extend(config.extra_terms.iter().cloned());

        Self {
            commit_labels: Denylist::compile(PaymentSignal::CommitLabel, &commit),
            card_fields: Denylist::compile(PaymentSignal::CardEntryField, &owned(CARD_FIELDS)),
            charge_language: Denylist::compile(
                PaymentSignal::ChargeConfirmation,
                &owned(CHARGE_LANGUAGE),
            ),
        }
    }

    /// Checks the top-ranked candidate and the screen it would act on.
    ///
    /// A pointer action without a label is judged by what the screen offers:
    /// if the screen shows a commit label, the click may well land on it.
    pub fn evaluate(&self, candidate: &ActionCandidate, context: &ScreenContext) -> SafetyVerdict {
        let label = candidate.label().map(str::trim).filter(|l| !l.is_empty());

        if let Some(label) = label {
            for list in [&self.commit_labels, &self.card_fields] {
                if let Some(matched) = list.find(label) {
                    return blocked(
                        list.signal,
                        matched,
                        format!("{} target '{}' matches '{}'", candidate.kind(), label, matched),
                    );
                }
            }
        }

        for list in [&self.commit_labels, &self.card_fields] {
            if let Some(matched) = list.find(&candidate.reasoning) {
                return blocked(
                    list.signal,
                    matched,
                    format!("{} reasoning mentions '{}'", candidate.kind(), matched),
                );
            }
        }

        if let Some(text) = candidate.input.text() {
            if let Some(m) = CARD_NUMBER.find(text) {
                return blocked(
                    PaymentSignal::CardNumberInput,
                    m.as_str(),
                    "typed text looks like a payment card number".to_string(),
                );
            }
        }

        if label.is_none() && candidate.kind().requires_coordinates() {
            if let Some(matched) = self.commit_labels.find(&context.description) {
                return blocked(
                    PaymentSignal::CommitLabel,
                    matched,
                    format!(
                        "unlabelled {} on a screen offering '{}'",
                        candidate.kind(),
                        matched
                    ),
                );
            }
        }

        for list in [&self.charge_language, &self.card_fields] {
            if let Some(matched) = list.find(&context.description) {
                return blocked(
                    list.signal,
                    matched,
                    format!("screen context contains '{matched}'"),
                );
            }
        }

        SafetyVerdict::Clear
    }

    /// Folds the inference service's payment-screen judgement into a verdict.
    /// A failed detection counts as a payment screen.
    pub fn screen_verdict(&self, detection: Result<bool>) -> SafetyVerdict {
        match detection {
            Ok(false) => SafetyVerdict::Clear,
            Ok(true) => blocked(
                PaymentSignal::PaymentScreen,
                "payment screen",
                "inference service detected a payment screen".to_string(),
            ),
            Err(e) => blocked(
                PaymentSignal::PaymentScreen,
                "detection failed",
                format!("payment screen detection failed: {e}"),
            ),
        }
    }
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self::new(&SafetyConfig::default())
    }
}

fn blocked(signal: PaymentSignal, matched: &str, reason: String) -> SafetyVerdict {
    SafetyVerdict::Blocked {
        signal,
        matched: matched.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionInput, ActionTarget, Confidence, Coordinates};

    fn click(label: &str) -> ActionCandidate {
        ActionCandidate::new(
            ActionInput::Click,
            Some(ActionTarget::new(label).at(1, 1)),
            Confidence::new(0.9).unwrap(),
        )
    }

    fn screen(text: &str) -> ScreenContext {
        ScreenContext::describe(text)
    }

    #[test]
    fn clears_ordinary_navigation() {
        let guard = SafetyGuard::default();
        assert_eq!(
            guard.evaluate(&click("Order"), &screen("Restaurant menu with dishes")),
            SafetyVerdict::Clear
        );
        assert_eq!(
            guard.evaluate(&click("Display settings"), &screen("Preferences")),
            SafetyVerdict::Clear
        );
    }

    #[test]
    fn blocks_commit_labels_case_insensitively() {
        let guard = SafetyGuard::default();
        match guard.evaluate(&click("Confirm Payment"), &screen("Checkout")) {
            SafetyVerdict::Blocked { signal, matched, .. } => {
                assert_eq!(signal, PaymentSignal::CommitLabel);
                assert_eq!(matched, "Confirm Payment");
            }
            SafetyVerdict::Clear => panic!("expected block"),
        }
        assert!(guard.evaluate(&click("PLACE  ORDER"), &screen("")).is_blocked());
        assert!(guard.evaluate(&click("Pay"), &screen("")).is_blocked());
    }

    #[test]
    fn blocks_card_entry_fields_and_card_numbers() {
        let guard = SafetyGuard::default();
        let typing = ActionCandidate::new(
            ActionInput::Type {
                text: "4111 1111 1111 1111".into(),
            },
            Some(ActionTarget::new("Notes")),
            Confidence::new(0.8).unwrap(),
        );
        assert!(matches!(
            guard.evaluate(&typing, &screen("")),
            SafetyVerdict::Blocked {
                signal: PaymentSignal::CardNumberInput,
                ..
            }
        ));
        assert!(matches!(
            guard.evaluate(&click("CVV"), &screen("")),
            SafetyVerdict::Blocked {
                signal: PaymentSignal::CardEntryField,
                ..
            }
        ));
    }

    #[test]
    fn blocks_on_charge_language_in_context() {
        let guard = SafetyGuard::default();
        let verdict = guard.evaluate(
            &click("Continue"),
            &screen("Review: you will be charged $12.40 today"),
        );
        assert!(matches!(
            verdict,
            SafetyVerdict::Blocked {
                signal: PaymentSignal::ChargeConfirmation,
                ..
            }
        ));
    }

    #[test]
    fn extra_terms_extend_the_denylist() {
        let guard = SafetyGuard::new(&SafetyConfig {
            extra_terms: vec!["top up wallet".into(), "Top-up!".into()],
        });
        assert!(guard.evaluate(&click("Top up wallet"), &screen("")).is_blocked());
        assert!(guard.evaluate(&click("Confirm Payment"), &screen("")).is_blocked());
        assert!(guard.evaluate(&click("Top-up!"), &screen("")).is_blocked());
        assert!(guard.evaluate(&click("Quick Top-up! now"), &screen("")).is_blocked());
        assert!(!guard.evaluate(&click("Top-ups"), &screen("")).is_blocked());
    }

    #[test]
    fn unlabelled_click_on_checkout_screen_is_blocked() {
        let guard = SafetyGuard::default();
        let checkout = screen("Checkout page. Order total $24.10. Buttons: Place order, Back to cart");
        let unlabelled = ActionCandidate::new(
            ActionInput::Click,
            Some(ActionTarget {
                element: String::new(),
                coordinates: Some(Coordinates { x: 640, y: 900 }),
            }),
            Confidence::new(0.97).unwrap(),
        );
        match guard.evaluate(&unlabelled, &checkout) {
            SafetyVerdict::Blocked { signal, matched, .. } => {
                assert_eq!(signal, PaymentSignal::CommitLabel);
                assert_eq!(matched, "Place order");
            }
            SafetyVerdict::Clear => panic!("expected block"),
        }

        let labelled = click("Back to cart");
        assert_eq!(guard.evaluate(&labelled, &checkout), SafetyVerdict::Clear);
    }

    #[test]
    fn reasoning_that_mentions_paying_is_blocked() {
        let guard = SafetyGuard::default();
        let candidate = click("Continue").with_reasoning("Click Place order to pay and finish");
        assert!(matches!(
            guard.evaluate(&candidate, &screen("Basket")),
            SafetyVerdict::Blocked {
                signal: PaymentSignal::CommitLabel,
                ..
            }
        ));
    }

    #[test]
    fn failed_screen_detection_blocks() {
        let guard = SafetyGuard::default();
        assert_eq!(guard.screen_verdict(Ok(false)), SafetyVerdict::Clear);
        assert!(guard.screen_verdict(Ok(true)).is_blocked());
        assert!(
            guard
                .screen_verdict(Err(crate::error::PilotError::InferenceUnavailable("503".into())))
                .is_blocked()
        );
    }
}
