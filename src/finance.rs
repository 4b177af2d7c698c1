use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::income::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Year,
    Rotation,
    Overall,
}

/// Amounts per resource plus their sum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub by_resource: BTreeMap<Resource, Decimal>,
    pub total: Decimal,
}

impl Tally {
    pub fn add(&mut self, resource: Resource, amount: Decimal) {
        *self.by_resource.entry(resource).or_insert(Decimal::ZERO) += amount;
        self.total += amount;
    }

    pub fn get(&self, resource: Resource) -> Decimal {
        self.by_resource
            .get(&resource)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tallies {
    pub year: Tally,
    pub rotation: Tally,
    pub overall: Tally,
}

impl Tallies {
    fn add(&mut self, resource: Resource, amount: Decimal) {
        self.year.add(resource, amount);
        self.rotation.add(resource, amount);
        self.overall.add(resource, amount);
    }

    pub fn get(&self, granularity: Granularity) -> &Tally {
        match granularity {
            Granularity::Year => &self.year,
            Granularity::Rotation => &self.rotation,
            Granularity::Overall => &self.overall,
        }
    }
}

/// Funds with income and expense tallies.
#[derive(Debug, Clone, Serialize)]
pub struct Accounts {
    funds: Decimal,
    income: Tallies,
    expenses: Tallies,
}

impl Accounts {
    pub fn new(funds: Decimal) -> Self {
        Self {
            funds,
            income: Tallies::default(),
            expenses: Tallies::default(),
        }
    }

    pub fn funds(&self) -> Decimal {
        self.funds
    }

    pub fn can_afford(&self, cost: Decimal) -> bool {
        self.funds >= cost
    }

    pub fn income(&self, granularity: Granularity) -> &Tally {
        self.income.get(granularity)
    }

    pub fn expenses(&self, granularity: Granularity) -> &Tally {
        self.expenses.get(granularity)
    }

    pub fn credit(&mut self, resource: Resource, amount: Decimal) {
        self.funds += amount;
        self.income.add(resource, amount);
    }

    /// Pays `cost` and books it against `resource`. Nothing is paid when
    /// funds fall short.
    pub fn try_pay(&mut self, resource: Resource, cost: Decimal) -> bool {
        if !self.can_afford(cost) {
            return false;
        }
        self.funds -= cost;
        self.expenses.add(resource, cost);
        true
    }

    pub fn start_year(&mut self) {
        self.income.year.reset();
        self.expenses.year.reset();
    }

    pub fn start_rotation(&mut self) {
        self.income.rotation.reset();
        self.expenses.rotation.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_requires_sufficient_funds() {
        let mut accounts = Accounts::new(Decimal::from(100));
        assert!(!accounts.try_pay(Resource::Timber, Decimal::from(101)));
        assert_eq!(accounts.funds(), Decimal::from(100));
        assert_eq!(accounts.expenses(Granularity::Overall).total, Decimal::ZERO);

        assert!(accounts.try_pay(Resource::Timber, Decimal::from(100)));
        assert_eq!(accounts.funds(), Decimal::ZERO);
        assert_eq!(
            accounts.expenses(Granularity::Year).get(Resource::Timber),
            Decimal::from(100)
        );
    }

    #[test]
    fn year_and_rotation_resets_keep_overall() {
        let mut accounts = Accounts::new(Decimal::ZERO);
        accounts.credit(Resource::Ntfp, Decimal::from(5));
        accounts.credit(Resource::Recreation, Decimal::from(7));
        accounts.start_year();
        assert_eq!(accounts.income(Granularity::Year).total, Decimal::ZERO);
        assert_eq!(accounts.income(Granularity::Rotation).total, Decimal::from(12));
        accounts.start_rotation();
        assert_eq!(accounts.income(Granularity::Rotation).total, Decimal::ZERO);
        assert_eq!(accounts.income(Granularity::Overall).total, Decimal::from(12));
        assert_eq!(accounts.funds(), Decimal::from(12));
    }
}
