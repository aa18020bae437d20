//! Settlement of a credit pool: generators, consumers and the quotas
//! linking them, advanced together one period at a time.
//!
//! Balances live in a [`BalanceSheet`] threaded through a fold over the
//! periods; nothing outside the fold holds ledger state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use raas_allocation::Allocation;
use raas_core::{DomainError, DomainResult, Energy, Period};
use raas_installations::{InstallationId, InstallationKind};

use crate::driver::{post_reading, validate_sequence};
use crate::policy::{LedgerPolicy, MissingPeriodPolicy};
use crate::record::{LedgerRecord, PeriodReading};

/// Carried balance per installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheet {
    balances: BTreeMap<InstallationId, Energy>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opening(balances: impl IntoIterator<Item = (InstallationId, Energy)>) -> Self {
        Self {
            balances: balances.into_iter().collect(),
        }
    }

    /// Unknown installations have a zero balance.
    pub fn balance(&self, id: InstallationId) -> Energy {
        self.balances.get(&id).copied().unwrap_or_default()
    }

    pub fn post(&mut self, id: InstallationId, balance: Energy) {
        self.balances.insert(id, balance);
    }

    pub fn total(&self) -> Option<Energy> {
        Energy::checked_sum(self.balances.values().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstallationId, Energy)> + '_ {
        self.balances.iter().map(|(id, e)| (*id, *e))
    }
}

/// One installation's inputs to a settlement run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationInput {
    pub id: InstallationId,
    pub opening_balance: Energy,
    /// Ascending by period.
    pub readings: Vec<PeriodReading>,
}

impl InstallationInput {
    pub fn new(id: InstallationId, opening_balance: Energy, readings: Vec<PeriodReading>) -> Self {
        Self {
            id,
            opening_balance,
            readings,
        }
    }
}

/// Everything settled together in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInput {
    pub generators: Vec<InstallationInput>,
    pub consumers: Vec<InstallationInput>,
    pub allocations: Vec<Allocation>,
}

/// How one generator's surplus was spread in one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPeriodSummary {
    pub generator: InstallationId,
    pub period: Period,
    pub transferred: Energy,
    /// Sum of the quota shares credited to consumers.
    pub distributed: Energy,
    /// Unallocated remainder, rounding loss, and shares of consumers with no
    /// reading for the period.
    pub forfeited: Energy,
}

/// Output of [`settle_pool`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettlement {
    pub records: BTreeMap<InstallationId, Vec<LedgerRecord>>,
    pub summaries: Vec<PoolPeriodSummary>,
    pub closing: BalanceSheet,
}

impl PoolSettlement {
    pub fn records_for(&self, id: InstallationId) -> &[LedgerRecord] {
        self.records.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// All records ordered by period, then installation.
    pub fn records_by_period(&self) -> Vec<&LedgerRecord> {
        let mut all: Vec<&LedgerRecord> = self.records.values().flatten().collect();
        all.sort_by_key(|r| (r.period, r.installation_id));
        all
    }

    pub fn record_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

struct Member<'a> {
    input: &'a InstallationInput,
    kind: InstallationKind,
    by_period: BTreeMap<Period, &'a PeriodReading>,
}

impl<'a> Member<'a> {
    fn new(input: &'a InstallationInput, kind: InstallationKind, policy: &LedgerPolicy) -> DomainResult<Self> {
        validate_sequence(input.id, &input.readings, policy)?;
        for reading in &input.readings {
            reading.validate_for(kind)?;
        }
        Ok(Self {
            input,
            kind,
            by_period: input.readings.iter().map(|r| (r.period, r)).collect(),
        })
    }
}

fn validate_allocations(
    generators: &BTreeMap<InstallationId, Member<'_>>,
    consumers: &BTreeMap<InstallationId, Member<'_>>,
    allocations: &[Allocation],
) -> DomainResult<()> {
    let mut pairs = BTreeSet::new();
    for allocation in allocations {
        if !generators.contains_key(&allocation.generator) {
            return Err(DomainError::not_found(format!(
                "generator {} referenced by allocation",
                allocation.generator
            )));
        }
        if !consumers.contains_key(&allocation.consumer) {
            return Err(DomainError::not_found(format!(
                "consumer {} referenced by allocation",
                allocation.consumer
            )));
        }
        if !pairs.insert((allocation.generator, allocation.consumer)) {
            return Err(DomainError::conflict(format!(
                "duplicate allocation from {} to {}",
                allocation.generator, allocation.consumer
            )));
        }
    }
    Ok(())
}

/// Settles every period of a pool in chronological order.
///
/// Per period, generators run first and their transfers are split by quota.
/// Each consumer then receives the sum of its shares. Periods outside an
/// installation's first..last reading are skipped for it; gaps inside follow
/// `policy.missing_period`. All inputs are validated before any period is
/// settled.
pub fn settle_pool(input: &PoolInput, policy: &LedgerPolicy) -> DomainResult<PoolSettlement> {
    let mut generators = BTreeMap::new();
    for g in &input.generators {
        let member = Member::new(g, InstallationKind::Generator, policy)?;
        if generators.insert(g.id, member).is_some() {
            return Err(DomainError::conflict(format!("installation {} listed twice", g.id)));
        }
    }
    let mut consumers = BTreeMap::new();
    for c in &input.consumers {
        if generators.contains_key(&c.id) {
            return Err(DomainError::conflict(format!(
                "installation {} listed as generator and consumer",
                c.id
            )));
        }
        let member = Member::new(c, InstallationKind::Consumer, policy)?;
        if consumers.insert(c.id, member).is_some() {
            return Err(DomainError::conflict(format!("installation {} listed twice", c.id)));
        }
    }
    validate_allocations(&generators, &consumers, &input.allocations)?;

    let periods: BTreeSet<Period> = input
        .generators
        .iter()
        .chain(&input.consumers)
        .flat_map(|i| i.readings.iter().map(|r| r.period))
        .collect();

    let opening = BalanceSheet::opening(
        input
            .generators
            .iter()
            .chain(&input.consumers)
            .map(|i| (i.id, i.opening_balance)),
    );

    periods.into_iter().try_fold(
        PoolSettlement {
            closing: opening,
            ..PoolSettlement::default()
        },
        |mut settlement, period| {
            settle_period(&mut settlement, period, &generators, &consumers, &input.allocations, policy)?;
            Ok(settlement)
        },
    )
}

fn settle_period(
    settlement: &mut PoolSettlement,
    period: Period,
    generators: &BTreeMap<InstallationId, Member<'_>>,
    consumers: &BTreeMap<InstallationId, Member<'_>>,
    allocations: &[Allocation],
    policy: &LedgerPolicy,
) -> DomainResult<()> {
    let mut transfers: BTreeMap<InstallationId, Energy> = BTreeMap::new();
    for (id, member) in generators {
        if let Some(reading) = member.by_period.get(&period) {
            let record = step_member(settlement, member, reading, Energy::ZERO, policy)?;
            transfers.insert(*id, record.transferred.unwrap_or_default());
        }
    }

    let mut received: BTreeMap<InstallationId, Energy> = BTreeMap::new();
    for (generator, transferred) in &transfers {
        let mut distributed = Energy::ZERO;
        for allocation in allocations.iter().filter(|a| a.generator == *generator) {
            if !consumers
                .get(&allocation.consumer)
                .is_some_and(|c| c.by_period.contains_key(&period))
            {
                continue;
            }
            let share = allocation.quota.share_of(*transferred);
            let entry = received.entry(allocation.consumer).or_default();
            *entry = entry
                .checked_add(share)
                .ok_or_else(|| DomainError::invariant(format!("{period}: received energy overflows")))?;
            distributed = distributed
                .checked_add(share)
                .ok_or_else(|| DomainError::invariant(format!("{period}: distributed energy overflows")))?;
        }
        settlement.summaries.push(PoolPeriodSummary {
            generator: *generator,
            period,
            transferred: *transferred,
            distributed,
            forfeited: transferred.saturating_sub(distributed),
        });
    }

    for (id, member) in consumers {
        let Some(reading) = member.by_period.get(&period) else {
            continue;
        };
        if policy.missing_period == MissingPeriodPolicy::Fail {
            if let Some(missing) = allocations
                .iter()
                .filter(|a| a.consumer == *id)
                .find(|a| !transfers.contains_key(&a.generator))
            {
                return Err(DomainError::sequencing(format!(
                    "{period}: consumer {id} has a reading but generator {} does not",
                    missing.generator
                )));
            }
        }
        let share = received.get(id).copied().unwrap_or_default();
        step_member(settlement, member, reading, share, policy)?;
    }

    Ok(())
}

fn step_member(
    settlement: &mut PoolSettlement,
    member: &Member<'_>,
    reading: &PeriodReading,
    received: Energy,
    policy: &LedgerPolicy,
) -> DomainResult<LedgerRecord> {
    let id = member.input.id;
    let previous = settlement.closing.balance(id);
    let record = post_reading(id, member.kind, previous, reading, received, policy)?;
    settlement.closing.post(id, record.current_balance);
    settlement.records.entry(id).or_default().push(record);
    Ok(record)
}
