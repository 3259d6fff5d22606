//! # Dummy Oracle Blueprint
//! Settable price feed for testing the Ballast protocol without an external price provider.
//! Every price carries the second it was published, so staleness handling can be exercised.

use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone)]
pub struct PriceEntry {
    pub price: Decimal,
    pub published_at: i64,
}

#[blueprint]
mod oracle {
    enable_method_auth! {
        methods {
            get_price => PUBLIC;
            set_price => restrict_to: [OWNER];
            set_published_at => restrict_to: [OWNER];
        }
    }

    struct Oracle {
        prices: HashMap<ResourceAddress, PriceEntry>,
    }

    impl Oracle {
        pub fn instantiate_oracle(collateral_address: ResourceAddress, initial_price: Decimal) -> Global<Oracle> {
            let mut prices: HashMap<ResourceAddress, PriceEntry> = HashMap::new();
            prices.insert(
                collateral_address,
                PriceEntry {
                    price: initial_price,
                    published_at: Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch,
                },
            );

            Self { prices }
                .instantiate()
                .prepare_to_globalize(OwnerRole::None)
                .metadata(metadata! {
                    init {
                        "name" => "Ballast Dummy Oracle".to_string(), updatable;
                        "description" => "A dummy oracle used for testing Ballast".to_string(), updatable;
                    }
                })
                .globalize()
        }

        /// Returns the latest price of the collateral and the unix second it was published at.
        pub fn get_price(&self, collateral: ResourceAddress) -> (Decimal, i64) {
            let entry = self
                .prices
                .get(&collateral)
                .expect("Collateral not supported.");
            (entry.price, entry.published_at)
        }

        pub fn set_price(&mut self, collateral: ResourceAddress, price: Decimal) {
            self.prices.insert(
                collateral,
                PriceEntry {
                    price,
                    published_at: Clock::current_time_rounded_to_seconds().seconds_since_unix_epoch,
                },
            );
        }

        pub fn set_published_at(&mut self, collateral: ResourceAddress, published_at: i64) {
            if let Some(entry) = self.prices.get_mut(&collateral) {
                entry.published_at = published_at;
            }
        }
    }
}
