//! Income streams drawn from the plot: timber, non-timber forest products
//! and recreation.

use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::chemistry::to_decimal;
use crate::config::{Availability, MicroworldConfig, WoodUsage};
use crate::environment::{CarbonDelta, CarbonLedger, Reservoir};
use crate::finance::Accounts;
use crate::rng::RngExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Timber,
    Ntfp,
    Recreation,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Timber, Resource::Ntfp, Resource::Recreation];
}

/// Plot state that scales non-timber availability.
#[derive(Debug, Clone, Copy)]
pub struct LandConditions {
    pub biodiversity_score: f64,
    pub dead_wood_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stock {
    /// Timber in grams of fresh wood; NTFP in kg; recreation in visits.
    pub available: f64,
    pub unit_price: Decimal,
    /// Income expected from this stream per rotation.
    pub sales_target: Decimal,
}

impl Stock {
    fn new(unit_price: Decimal) -> Self {
        Self {
            available: 0.0,
            unit_price,
            sales_target: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timber {
    stock: Stock,
    usage: WoodUsage,
    dry_weight_fraction: f64,
    carbon_fraction: f64,
    carbon_scale_factor: f64,
}

impl Timber {
    /// Splits sold wood into lumber, which keeps its carbon, and fuel,
    /// which returns it to the air.
    pub fn use_wood(&self, weight: f64, ledger: &mut dyn CarbonLedger) {
        for (fraction, destination) in [
            (self.usage.lumber, Reservoir::Lumber),
            (self.usage.energy, Reservoir::Air),
        ] {
            let carbon = weight
                * fraction
                * self.dry_weight_fraction
                * self.carbon_fraction
                * self.carbon_scale_factor;
            let amount = to_decimal(carbon);
            if amount > Decimal::ZERO {
                ledger.update_carbon(&CarbonDelta::transfer(
                    Reservoir::Vegetation,
                    destination,
                    amount,
                ));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ntfp {
    stock: Stock,
    availability: Availability,
    maintenance_cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct Recreation {
    stock: Stock,
    availability: Availability,
    build_cost: Decimal,
    maintenance_cost: Decimal,
    built: bool,
}

impl Recreation {
    pub fn is_built(&self) -> bool {
        self.built
    }
}

#[derive(Debug, Clone)]
pub enum IncomeSource {
    Timber(Timber),
    Ntfp(Ntfp),
    Recreation(Recreation),
}

impl IncomeSource {
    pub fn from_config(resource: Resource, config: &MicroworldConfig) -> Self {
        let economy = &config.economy;
        match resource {
            Resource::Timber => IncomeSource::Timber(Timber {
                stock: Stock::new(economy.timber.price_per_kg),
                usage: economy.timber.usage,
                dry_weight_fraction: config.trees.dry_weight_fraction,
                carbon_fraction: config.trees.carbon_fraction,
                carbon_scale_factor: config.trees.carbon_scale_factor,
            }),
            Resource::Ntfp => IncomeSource::Ntfp(Ntfp {
                stock: Stock::new(economy.ntfp.price_per_unit),
                availability: economy.ntfp.availability,
                maintenance_cost: economy.ntfp.maintenance_cost,
            }),
            Resource::Recreation => IncomeSource::Recreation(Recreation {
                stock: Stock::new(economy.recreation.price_per_unit),
                availability: economy.recreation.availability,
                build_cost: economy.recreation.build_cost,
                maintenance_cost: economy.recreation.maintenance_cost,
                built: false,
            }),
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            IncomeSource::Timber(_) => Resource::Timber,
            IncomeSource::Ntfp(_) => Resource::Ntfp,
            IncomeSource::Recreation(_) => Resource::Recreation,
        }
    }

    pub fn stock(&self) -> &Stock {
        match self {
            IncomeSource::Timber(t) => &t.stock,
            IncomeSource::Ntfp(n) => &n.stock,
            IncomeSource::Recreation(r) => &r.stock,
        }
    }

    fn stock_mut(&mut self) -> &mut Stock {
        match self {
            IncomeSource::Timber(t) => &mut t.stock,
            IncomeSource::Ntfp(n) => &mut n.stock,
            IncomeSource::Recreation(r) => &mut r.stock,
        }
    }

    pub fn available(&self) -> f64 {
        self.stock().available
    }

    pub fn add_available(&mut self, amount: f64) {
        self.stock_mut().available += amount.max(0.0);
    }

    pub fn sales_target(&self) -> Decimal {
        self.stock().sales_target
    }

    pub fn set_sales_target(&mut self, income_target: Decimal, dependency: f64) {
        self.stock_mut().sales_target = income_target * to_decimal(dependency);
    }

    /// Sells everything available and returns the proceeds.
    pub fn sell(&mut self, ledger: &mut dyn CarbonLedger) -> Decimal {
        let available = self.available().max(0.0);
        let unit_price = self.stock().unit_price;
        let proceeds = match self {
            IncomeSource::Timber(timber) => {
                // Wood is weighed in grams but priced per kilogram.
                timber.use_wood(available, ledger);
                to_decimal(available / 1000.0) * unit_price
            }
            IncomeSource::Ntfp(_) | IncomeSource::Recreation(_) => {
                to_decimal(available) * unit_price
            }
        };
        self.stock_mut().available = 0.0;
        proceeds
    }

    /// Pays this year's upkeep (scaled by `dependency`) and samples what the
    /// plot yields. Timber availability comes from felling instead.
    pub fn update_availability(
        &mut self,
        dependency: f64,
        accounts: &mut Accounts,
        conditions: LandConditions,
        rng: &mut dyn RngCore,
    ) {
        let resource = self.resource();
        let share = to_decimal(dependency);
        match self {
            IncomeSource::Timber(_) => {}
            IncomeSource::Ntfp(ntfp) => {
                let paid =
                    dependency > 0.0 && accounts.try_pay(resource, ntfp.maintenance_cost * share);
                ntfp.stock.available = if paid {
                    let max = rng.normal(ntfp.availability.mean, ntfp.availability.sd);
                    let from_biodiversity = (max * conditions.biodiversity_score).max(0.0);
                    let from_dead_wood = (max * conditions.dead_wood_fraction).max(0.0);
                    (from_biodiversity + from_dead_wood) / 2.0
                } else {
                    0.0
                };
            }
            IncomeSource::Recreation(recreation) => {
                let paid = dependency > 0.0 && recreation.build_and_maintain(accounts, share);
                recreation.stock.available = if paid {
                    let max = rng.normal(recreation.availability.mean, recreation.availability.sd);
                    (max * conditions.biodiversity_score).max(0.0)
                } else {
                    0.0
                };
            }
        }
        trace!(?resource, available = self.available(), "availability updated");
    }
}

impl Recreation {
    fn build_and_maintain(&mut self, accounts: &mut Accounts, share: Decimal) -> bool {
        let maintenance = self.maintenance_cost * share;
        if !self.built {
            let build = self.build_cost * share;
            if !accounts.can_afford(build + maintenance) {
                return false;
            }
            accounts.try_pay(Resource::Recreation, build);
            self.built = true;
        }
        accounts.try_pay(Resource::Recreation, maintenance)
    }
}
