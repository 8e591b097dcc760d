//! Simulation controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{info, warn};

use nostrovostro_common::{InstitutionId, InstitutionRecord, SettleError, Transaction};
use nostrovostro_coordinator::bootstrap::default_institutions;
use nostrovostro_coordinator::{Coordinator, CoordinatorConfig};
use nostrovostro_ledger::{FaultyStore, MemoryStore};

use crate::metrics::SimulationMetrics;
use crate::scenario::{instruction_fields, AssertCondition, Expectation, FaultType, Scenario, ScenarioStep};

/// Controls the simulation.
pub struct SimulationController {
    /// Service under test.
    coordinator: Arc<Coordinator>,
    /// Store with fault injection.
    store: Arc<FaultyStore>,
    /// Records the run started from.
    initial: Vec<InstitutionRecord>,
    /// Audit-role id for full journal reads.
    auditor: InstitutionId,
    /// Random number generator.
    rng: StdRng,
    /// Submissions so far, for generated reference numbers.
    submitted: usize,
    /// Simulation metrics.
    metrics: SimulationMetrics,
}

impl SimulationController {
    /// Start a service over a fresh in-memory store seeded with the default
    /// banks.
    pub async fn new(
        config: CoordinatorConfig,
        unbatched: bool,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let memory = if unbatched {
            MemoryStore::without_batches()
        } else {
            MemoryStore::new()
        };
        let store = Arc::new(FaultyStore::new(memory));
        let auditor = config.auditor_id.clone();

        let coordinator = Arc::new(Coordinator::new(config, store.clone())?);
        coordinator.start().await?;

        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        info!(unbatched, "Simulation initialized");

        Ok(Self {
            coordinator,
            store,
            initial: default_institutions(),
            auditor,
            rng,
            submitted: 0,
            metrics: SimulationMetrics::new(),
        })
    }

    /// Run every step of a scenario, failing on the first unmet expectation.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for (index, step) in scenario.steps.iter().enumerate() {
            self.execute_step(step)
                .await
                .map_err(|e| anyhow::anyhow!("step {} of {}: {}", index + 1, scenario.name, e))?;
        }

        Ok(())
    }

    /// Submit `count` generated instructions, at most `concurrency` at once.
    pub async fn run_random(&mut self, count: usize, concurrency: usize) -> anyhow::Result<()> {
        let instructions: Vec<_> = (0..count).map(|_| self.random_instruction()).collect();
        info!(count, concurrency, "Submitting generated instructions");

        let coordinator = self.coordinator.clone();
        let results: Vec<_> = stream::iter(instructions)
            .map(|fields| {
                let coordinator = coordinator.clone();
                async move {
                    let started = Instant::now();
                    let result = coordinator.submit_transaction(&fields).await;
                    (result, started.elapsed())
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (result, latency) in &results {
            self.record(result, *latency);
        }

        Ok(())
    }

    /// Check that every balance equals its starting value plus the legs of
    /// the completed transactions in the journal. Returns the number of
    /// completed transactions replayed.
    pub async fn verify_ledger(&self) -> anyhow::Result<usize> {
        let mut expected: HashMap<(InstitutionId, InstitutionId), Decimal> = self
            .initial
            .iter()
            .flat_map(|record| {
                record
                    .accounts
                    .iter()
                    .map(move |a| ((record.owner.clone(), a.holder.clone()), a.cash_balance))
            })
            .collect();

        let journal = self.coordinator.get_transactions(&self.auditor).await?;
        let completed: Vec<&Transaction> = journal.iter().filter(|t| t.is_completed()).collect();

        for tx in &completed {
            let debit = tx.converted_amount.ok_or_else(|| {
                anyhow::anyhow!("completed transaction {} has no converted amount", tx.ref_number)
            })?;
            *expected
                .entry((tx.sender.clone(), tx.receiver.clone()))
                .or_default() += tx.amount;
            *expected
                .entry((tx.receiver.clone(), tx.sender.clone()))
                .or_default() -= debit;
        }

        for ((owner, holder), balance) in &expected {
            let actual = self.balance(owner, holder).await?;
            if actual != *balance {
                anyhow::bail!(
                    "{} account for {}: expected {}, found {}",
                    owner,
                    holder,
                    balance,
                    actual
                );
            }
        }

        info!(completed = completed.len(), journaled = journal.len(), "Ledger verified");
        Ok(completed.len())
    }

    /// Get simulation metrics.
    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    /// The service under test.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Execute a single scenario step.
    async fn execute_step(&mut self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Submit { fields, expect } => {
                let started = Instant::now();
                let result = self.coordinator.submit_transaction(fields).await;
                self.record(&result, started.elapsed());
                if let Some(expect) = expect {
                    check_expectation(&result, expect)?;
                }
            }
            ScenarioStep::RandomLoad { count, concurrency } => {
                self.run_random(*count, *concurrency).await?;
            }
            ScenarioStep::InjectFault { fault } => {
                info!("Injecting fault {:?}", fault);
                match fault {
                    FaultType::FailWrites { key, skip, times } => {
                        self.store.fail_writes(key.clone(), *skip, *times);
                    }
                    FaultType::SlowReads { delay_ms } => {
                        self.store.set_get_delay(Some(Duration::from_millis(*delay_ms)));
                    }
                    FaultType::ClearSlowReads => self.store.set_get_delay(None),
                }
            }
            ScenarioStep::Recover { expect_replayed } => {
                let replayed = self.coordinator.recover().await?;
                info!(replayed, "Recovery finished");
                if let Some(expected) = expect_replayed {
                    if replayed != *expected {
                        anyhow::bail!("expected {} replayed intents, got {}", expected, replayed);
                    }
                }
            }
            ScenarioStep::Assert { condition } => match condition {
                AssertCondition::BalanceEquals {
                    owner,
                    holder,
                    amount,
                } => {
                    let expected: Decimal = amount.parse()?;
                    let actual = self
                        .balance(&InstitutionId::new(owner.as_str()), &InstitutionId::new(holder.as_str()))
                        .await?;
                    if actual != expected {
                        anyhow::bail!(
                            "{} account for {}: expected {}, found {}",
                            owner,
                            holder,
                            expected,
                            actual
                        );
                    }
                }
                AssertCondition::JournalLength { count } => {
                    let actual = self.coordinator.journal_len().await?;
                    if actual != *count {
                        anyhow::bail!("expected {} journaled transactions, found {}", count, actual);
                    }
                }
            },
        }

        Ok(())
    }

    async fn balance(&self, owner: &InstitutionId, holder: &InstitutionId) -> anyhow::Result<Decimal> {
        let record = self.coordinator.get_institution(owner).await?;
        record
            .account_for(holder)
            .map(|a| a.cash_balance)
            .ok_or_else(|| anyhow::anyhow!("{} keeps no account for {}", owner, holder))
    }

    fn record(&mut self, result: &Result<Transaction, SettleError>, latency: Duration) {
        match result {
            Ok(tx) if tx.is_completed() => self.metrics.record_completed(latency),
            Ok(_) => self.metrics.record_rejected(latency),
            Err(e) => {
                warn!(error = %e, "Submission failed");
                self.metrics.record_error();
            }
        }
    }

    /// Mostly valid payments between the default banks, with some in a
    /// currency no account uses, some unparseable and some oversized.
    fn random_instruction(&mut self) -> Vec<String> {
        self.submitted += 1;
        let reference = format!("SIM{:06}", self.submitted);

        let n = self.initial.len();
        let from = self.rng.gen_range(0..n);
        let to = (from + self.rng.gen_range(1..n)) % n;
        let (sender, receiver) = (self.initial[from].owner.as_str(), self.initial[to].owner.as_str());

        let home = self.initial[from]
            .accounts
            .first()
            .map(|a| a.currency.code().to_string())
            .unwrap_or_else(|| "USD".to_string());

        let roll = self.rng.gen_range(0..100);
        let (currency, amount) = match roll {
            0..=4 => ("GBP".to_string(), "100".to_string()),
            5..=7 => (home, "abc".to_string()),
            8..=9 => (home, "10000000".to_string()),
            _ => {
                let cents = self.rng.gen_range(1..5_000_000i64);
                (home, Decimal::new(cents, 2).to_string())
            }
        };

        instruction_fields(&reference, &currency, &amount, sender, receiver)
    }
}

fn check_expectation(
    result: &Result<Transaction, SettleError>,
    expect: &Expectation,
) -> anyhow::Result<()> {
    match (result, expect) {
        (Ok(tx), Expectation::Status { message }) if &tx.status_message == message => Ok(()),
        (Err(e), Expectation::Error { code }) if e.error_code() == code.as_str() => Ok(()),
        (Ok(tx), _) => anyhow::bail!("expected {:?}, got status {:?}", expect, tx.status_message),
        (Err(e), _) => anyhow::bail!("expected {:?}, got error {}", expect, e),
    }
}
