//! Conversation decision procedure.
//!
//! `decide` is pure: it maps a reply plus the control's flags to the first
//! matching rule and the effects that rule requests. Executing the effects is
//! the workflow's job.

use std::time::Duration;

use super::classifier::{Intent, MatchMode, classify, is_clear_positive};
use super::texts::{self, TransferReason};

/// Retries at which the conversation is handed to a human.
pub const RETRY_LIMIT: i64 = 3;
/// Retries from which error messages mention the attendant.
pub const ATTENDANT_HINT_FROM: i64 = 2;

pub const CLOSE_AFTER_TRANSFER: Duration = Duration::from_secs(30);
pub const CLOSE_AFTER_UNCLEAR_PROBE: Duration = Duration::from_secs(60);

/// Everything the procedure looks at.
#[derive(Debug, Clone, Copy)]
pub struct Inputs<'a> {
    pub text: &'a str,
    pub retries: i64,
    pub pendencies: bool,
    pub mode: MatchMode,
    pub chat_confirmed: bool,
    pub ticket_closed: bool,
    pub client_needs_help: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendText(String),
    /// Mark the control closed and close the ticket shortly after.
    Confirm,
    SetClientNeedsHelp(bool),
    Transfer(TransferReason),
    /// Close the ticket later, if the needs-help flag still reads `expect_needs_help`.
    CloseTicketAfter {
        delay: Duration,
        expect_needs_help: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    UnexpectedMessage,
    ProbeAccepted,
    ProbeDeclined,
    ProbeUnclear,
    Confirmed,
    PendenciesDeclined,
    NotText,
    Escalated,
    Fallback,
}

impl Rule {
    /// Short outcome description for logs and responses.
    pub fn outcome(self) -> &'static str {
        match self {
            Rule::UnexpectedMessage => "unexpected message after confirmation, probing for help",
            Rule::ProbeAccepted => "customer asked for an attendant",
            Rule::ProbeDeclined => "customer did not need an attendant",
            Rule::ProbeUnclear => "unclear probe answer, asking again",
            Rule::Confirmed => "receipt confirmed",
            Rule::PendenciesDeclined => "customer declined pending documents",
            Rule::NotText => "non-text reply",
            Rule::Escalated => "forwarded to an attendant",
            Rule::Fallback => "reply not understood, error message sent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub rule: Rule,
    pub effects: Vec<Effect>,
}

impl Decision {
    fn new(rule: Rule, effects: Vec<Effect>) -> Self {
        Self { rule, effects }
    }

    pub fn transfer_reason(&self) -> Option<TransferReason> {
        self.effects.iter().find_map(|e| match e {
            Effect::Transfer(reason) => Some(*reason),
            _ => None,
        })
    }
}

fn say(text: impl Into<String>) -> Effect {
    Effect::SendText(text.into())
}

/// Pick the first rule that applies. Every input maps to exactly one rule.
pub fn decide(input: &Inputs<'_>) -> Decision {
    let Inputs {
        text,
        retries,
        pendencies,
        mode,
        chat_confirmed,
        ticket_closed,
        client_needs_help,
    } = *input;

    if chat_confirmed && !client_needs_help {
        return Decision::new(
            Rule::UnexpectedMessage,
            vec![
                say(texts::UNEXPECTED_MESSAGE),
                Effect::SetClientNeedsHelp(true),
            ],
        );
    }

    if chat_confirmed && client_needs_help {
        if is_clear_positive(text, mode) {
            return Decision::new(
                Rule::ProbeAccepted,
                vec![
                    Effect::Transfer(TransferReason::AskForAttendant),
                    say(texts::ASK_FOR_ATTENDANT),
                    Effect::CloseTicketAfter {
                        delay: CLOSE_AFTER_TRANSFER,
                        expect_needs_help: false,
                    },
                    Effect::SetClientNeedsHelp(false),
                ],
            );
        }

        if classify(text, Intent::Negative, mode) {
            return Decision::new(
                Rule::ProbeDeclined,
                vec![
                    say(texts::DONT_NEED_ATTENDANT),
                    Effect::SetClientNeedsHelp(false),
                    Effect::Confirm,
                ],
            );
        }

        return Decision::new(
            Rule::ProbeUnclear,
            vec![
                say(texts::RETRY_ASK_FOR_ATTENDANT),
                Effect::CloseTicketAfter {
                    delay: CLOSE_AFTER_UNCLEAR_PROBE,
                    expect_needs_help: true,
                },
            ],
        );
    }

    if is_clear_positive(text, mode) {
        return Decision::new(
            Rule::Confirmed,
            vec![say(texts::MESSAGE_CONFIRMED), Effect::Confirm],
        );
    }

    if pendencies && classify(text, Intent::Negative, mode) {
        return Decision::new(
            Rule::PendenciesDeclined,
            vec![say(texts::NEGATIVE_RESPONSE), Effect::Confirm],
        );
    }

    // Placeholder type names are whole tokens whatever the caller's mode.
    if classify(text, Intent::NotText, MatchMode::Exact) {
        return Decision::new(Rule::NotText, vec![say(texts::NOT_TEXT_MESSAGE_RECEIVED)]);
    }

    let exhausted = retries >= RETRY_LIMIT && !ticket_closed;
    if classify(text, Intent::Assistance, mode) || exhausted {
        let reason = if retries >= RETRY_LIMIT {
            TransferReason::ExceededRetries
        } else {
            TransferReason::AskForAttendant
        };
        return Decision::new(
            Rule::Escalated,
            vec![
                say(texts::ASK_ASSISTANCE),
                Effect::Confirm,
                Effect::Transfer(reason),
            ],
        );
    }

    Decision::new(
        Rule::Fallback,
        vec![say(texts::error_message(retries, pendencies))],
    )
}
