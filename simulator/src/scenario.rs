//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Run against a store without atomic batches.
    #[serde(default)]
    pub unbatched: bool,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Submit an instruction.
    Submit {
        fields: Vec<String>,
        #[serde(default)]
        expect: Option<Expectation>,
    },
    /// Submit generated instructions concurrently.
    RandomLoad { count: usize, concurrency: usize },
    /// Inject a store fault.
    InjectFault { fault: FaultType },
    /// Replay interrupted settlements.
    Recover { expect_replayed: Option<usize> },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Expected result of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expectation {
    /// Journaled with this status message.
    Status { message: String },
    /// Refused with this error code.
    Error { code: String },
}

/// Faults that can be injected into the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaultType {
    /// Fail writes to a key after letting `skip` through.
    FailWrites { key: String, skip: u32, times: u32 },
    /// Delay every read.
    SlowReads { delay_ms: u64 },
    /// Remove the read delay.
    ClearSlowReads,
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// Balance of the account `owner` keeps for `holder`.
    BalanceEquals {
        owner: String,
        holder: String,
        amount: String,
    },
    /// Number of journaled transactions.
    JournalLength { count: u64 },
}

impl Scenario {
    /// Load a built-in scenario by name, or a scenario file ending in `.json`.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        if name.ends_with(".json") {
            let raw = std::fs::read_to_string(Path::new(name))?;
            return Ok(serde_json::from_str(&raw)?);
        }

        match name {
            "simple-settlement" => Ok(Self::simple_settlement()),
            "multi-currency" => Ok(Self::multi_currency()),
            "validation-failures" => Ok(Self::validation_failures()),
            "failure-recovery" => Ok(Self::failure_recovery()),
            "high-volume" => Ok(Self::high_volume()),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Names of the built-in scenarios.
    pub fn builtin() -> &'static [&'static str] {
        &[
            "simple-settlement",
            "multi-currency",
            "validation-failures",
            "failure-recovery",
            "high-volume",
        ]
    }

    /// One USD payment from BANKA to BANKB.
    fn simple_settlement() -> Self {
        Self {
            name: "simple-settlement".to_string(),
            description: "USD payment settled against an AUD nostro".to_string(),
            unbatched: false,
            steps: vec![
                submit("R1", "USD", "1000", "BANKA", "BANKB", completed()),
                balance("BANKB", "BANKA", "333660"),
                balance("BANKA", "BANKB", "251000"),
                journal_length(1),
            ],
        }
    }

    /// A payment in each home currency.
    fn multi_currency() -> Self {
        Self {
            name: "multi-currency".to_string(),
            description: "Payments converted through each default rate".to_string(),
            unbatched: false,
            steps: vec![
                submit("R1", "USD", "1000", "BANKA", "BANKB", completed()),
                submit("R2", "EUR", "500", "BANKC", "BANKA", completed()),
                submit("R3", "AUD", "1000", "BANKB", "BANKC", completed()),
                balance("BANKA", "BANKB", "251000"),
                balance("BANKB", "BANKA", "333660"),
                balance("BANKC", "BANKA", "324500"),
                balance("BANKA", "BANKC", "359450"),
                balance("BANKB", "BANKC", "121000"),
                balance("BANKC", "BANKB", "79730"),
                journal_length(3),
            ],
        }
    }

    /// Rejected instructions are journaled and move nothing.
    fn validation_failures() -> Self {
        Self {
            name: "validation-failures".to_string(),
            description: "Rejections journaled without balance changes".to_string(),
            unbatched: false,
            steps: vec![
                submit(
                    "R1",
                    "USD",
                    "1000000",
                    "BANKA",
                    "BANKB",
                    status("Insufficient funds on Nostro Account"),
                ),
                submit(
                    "R2",
                    "GBP",
                    "10",
                    "BANKA",
                    "BANKB",
                    status("BANKB doesn't have an account in GBP with BANKA"),
                ),
                submit("R3", "USD", "abc", "BANKA", "BANKB", status("Invalid Amount")),
                submit(
                    "R4",
                    "USD",
                    "10",
                    "BANKA",
                    "NOBANK",
                    Some(Expectation::Error {
                        code: "LOOKUP_FAILURE".to_string(),
                    }),
                ),
                balance("BANKA", "BANKB", "250000"),
                balance("BANKB", "BANKA", "335000"),
                journal_length(3),
            ],
        }
    }

    /// Store failures between legs, compensation and roll-forward.
    fn failure_recovery() -> Self {
        Self {
            name: "failure-recovery".to_string(),
            description: "Store faults during commit and recovery".to_string(),
            unbatched: true,
            steps: vec![
                // Second leg fails; the first is reversed.
                ScenarioStep::InjectFault {
                    fault: FaultType::FailWrites {
                        key: "BANKB".to_string(),
                        skip: 0,
                        times: 1,
                    },
                },
                submit("R1", "USD", "1000", "BANKA", "BANKB", error("PARTIAL_COMMIT")),
                balance("BANKA", "BANKB", "250000"),
                balance("BANKB", "BANKA", "335000"),
                journal_length(0),
                // Both legs land but the journal write fails; the intent stays.
                ScenarioStep::InjectFault {
                    fault: FaultType::FailWrites {
                        key: "journal/head".to_string(),
                        skip: 0,
                        times: 1,
                    },
                },
                submit("R2", "USD", "1000", "BANKA", "BANKB", error("PARTIAL_COMMIT")),
                balance("BANKA", "BANKB", "251000"),
                journal_length(0),
                ScenarioStep::Recover {
                    expect_replayed: Some(1),
                },
                journal_length(1),
                submit("R3", "USD", "1000", "BANKA", "BANKB", completed()),
                balance("BANKB", "BANKA", "332320"),
                journal_length(2),
            ],
        }
    }

    /// Concurrent generated load.
    fn high_volume() -> Self {
        Self {
            name: "high-volume".to_string(),
            description: "Concurrent generated instructions".to_string(),
            unbatched: false,
            steps: vec![ScenarioStep::RandomLoad {
                count: 500,
                concurrency: 16,
            }],
        }
    }
}

/// The ten instruction fields with fixed op code, date, customers and charges.
pub fn instruction_fields(
    reference: &str,
    currency: &str,
    amount: &str,
    sender: &str,
    receiver: &str,
) -> Vec<String> {
    [
        reference,
        "CRED",
        "2017-01-01",
        currency,
        amount,
        sender,
        receiver,
        "ordering customer",
        "beneficiary customer",
        "SHA",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn submit(
    reference: &str,
    currency: &str,
    amount: &str,
    sender: &str,
    receiver: &str,
    expect: Option<Expectation>,
) -> ScenarioStep {
    ScenarioStep::Submit {
        fields: instruction_fields(reference, currency, amount, sender, receiver),
        expect,
    }
}

fn completed() -> Option<Expectation> {
    status("Transaction Completed")
}

fn status(message: &str) -> Option<Expectation> {
    Some(Expectation::Status {
        message: message.to_string(),
    })
}

fn error(code: &str) -> Option<Expectation> {
    Some(Expectation::Error {
        code: code.to_string(),
    })
}

fn balance(owner: &str, holder: &str, amount: &str) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            owner: owner.to_string(),
            holder: holder.to_string(),
            amount: amount.to_string(),
        },
    }
}

fn journal_length(count: u64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::JournalLength { count },
    }
}
