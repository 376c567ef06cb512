use std::collections::BTreeMap;
use std::fmt;

use contracts::ResourceAmounts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    InsufficientResource {
        name: String,
        required: u64,
        available: u64,
    },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientResource {
                name,
                required,
                available,
            } => write!(
                f,
                "not enough {name}: required={required} available={available}"
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Named non-negative balances plus running credit/debit totals.
///
/// Callers serialize access; the ledger itself is plain data so that a
/// check followed by a debit can never interleave with another mutator
/// as long as both happen under the same `&mut` borrow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLedger {
    balances: ResourceAmounts,
    credited_total: ResourceAmounts,
    debited_total: ResourceAmounts,
}

impl ResourceLedger {
    pub fn seeded(initial: &ResourceAmounts) -> Self {
        Self {
            balances: initial.clone(),
            credited_total: BTreeMap::new(),
            debited_total: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.balances.get(name).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &ResourceAmounts {
        &self.balances
    }

    pub fn credit(&mut self, name: &str, amount: u64) {
        let balance = self.balances.entry(name.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);
        let total = self.credited_total.entry(name.to_string()).or_insert(0);
        *total = total.saturating_add(amount);
    }

    pub fn try_debit(&mut self, name: &str, amount: u64) -> Result<(), LedgerError> {
        self.check(name, amount)?;
        self.apply_debit(name, amount);
        Ok(())
    }

    /// Debits every entry or none of them. Every check runs against the
    /// current balances before the first subtraction.
    pub fn debit_all(&mut self, costs: &ResourceAmounts) -> Result<(), LedgerError> {
        for (name, amount) in costs {
            self.check(name, *amount)?;
        }

        for (name, amount) in costs {
            self.apply_debit(name, *amount);
        }

        Ok(())
    }

    pub fn can_cover(&self, costs: &ResourceAmounts) -> bool {
        costs
            .iter()
            .all(|(name, amount)| self.get(name) >= *amount)
    }

    pub fn credited_total(&self, name: &str) -> u64 {
        self.credited_total.get(name).copied().unwrap_or(0)
    }

    pub fn debited_total(&self, name: &str) -> u64 {
        self.debited_total.get(name).copied().unwrap_or(0)
    }

    /// Balance must equal seed + credits - debits for every resource ever touched.
    pub fn verify_conservation(&self, seed: &ResourceAmounts) -> bool {
        let mut names = self.balances.keys().collect::<Vec<_>>();
        names.extend(self.credited_total.keys());
        names.extend(self.debited_total.keys());
        names.extend(seed.keys());

        names.into_iter().all(|name| {
            let start = i128::from(seed.get(name).copied().unwrap_or(0));
            let expected = start + i128::from(self.credited_total(name))
                - i128::from(self.debited_total(name));
            expected == i128::from(self.get(name))
        })
    }

    fn check(&self, name: &str, amount: u64) -> Result<(), LedgerError> {
        let available = self.get(name);
        if available < amount {
            return Err(LedgerError::InsufficientResource {
                name: name.to_string(),
                required: amount,
                available,
            });
        }
        Ok(())
    }

    fn apply_debit(&mut self, name: &str, amount: u64) {
        if amount == 0 {
            return;
        }
        if let Some(balance) = self.balances.get_mut(name) {
            *balance -= amount;
        }
        let total = self.debited_total.entry(name.to_string()).or_insert(0);
        *total = total.saturating_add(amount);
    }
}
