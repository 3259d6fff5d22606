#![allow(dead_code)]

use ballast_protocol::ballast_component::ballast_component_test::*;
use ballast_protocol::shared_structs::*;
use ballast_protocol::stability_pool::stability_pool_test::*;
use dummy_oracle_component::oracle_test::*;
use scrypto_test::prelude::*;

pub struct Helper {
    pub env: TestEnvironment<InMemorySubstateDatabase>,
    pub package_address: PackageAddress,
    pub controller_badge: Bucket,
    pub xrd: Bucket,
    pub xrd_address: ResourceAddress,
    pub busd_address: ResourceAddress,
    pub position_address: ResourceAddress,
    pub deposit_address: ResourceAddress,
    pub front_end_address: ResourceAddress,
    pub reward_address: ResourceAddress,
    pub ballast: Ballast,
    pub stability_pool: StabilityPool,
    pub dummy_oracle: Oracle,
}

impl Helper {
    pub fn new() -> Result<Self, RuntimeError> {
        let mut env = TestEnvironmentBuilder::new().build();

        let xrd = ResourceBuilder::new_fungible(OwnerRole::None)
            .divisibility(18)
            .mint_initial_supply(1000000, &mut env)?;
        let xrd_address = xrd.resource_address(&mut env)?;

        let dummy_oracle_package_address = PackageFactory::compile_and_publish(
            "./dummy_oracle_component",
            &mut env,
            CompileProfile::Standard,
        )?;

        let dummy_oracle = Oracle::instantiate_oracle(
            xrd_address,
            dec!(100),
            dummy_oracle_package_address,
            &mut env,
        )?;
        let oracle_address = ComponentAddress::try_from(dummy_oracle.0.clone()).unwrap();

        let package_address = PackageFactory::compile_and_publish(
            this_package!(),
            &mut env,
            CompileProfile::Standard,
        )?;

        let (ballast, controller_badge, position_address, busd_address) = Ballast::instantiate(
            xrd_address,
            oracle_address,
            "get_price".to_string(),
            GlobalAddress::from(oracle_address),
            package_address,
            &mut env,
        )?;
        let ballast_address = ComponentAddress::try_from(*ballast.as_node_id()).unwrap();

        let pool_badge = controller_badge.take(Decimal::ONE, &mut env)?;
        let (stability_pool, deposit_address, front_end_address, reward_address) =
            StabilityPool::instantiate(
                pool_badge,
                ballast_address,
                xrd_address,
                dec!(32000000),
                GlobalAddress::from(oracle_address),
                package_address,
                &mut env,
            )?;

        Ok(Self {
            env,
            package_address,
            controller_badge,
            xrd: xrd.into(),
            xrd_address,
            busd_address,
            position_address,
            deposit_address,
            front_end_address,
            reward_address,
            ballast: Ballast(*ballast.as_node_id()),
            stability_pool: StabilityPool(*stability_pool.as_node_id()),
            dummy_oracle: Oracle(dummy_oracle.0),
        })
    }

    /////////////////////////////////////////////////
    ////////////////// POSITIONS ////////////////////
    /////////////////////////////////////////////////

    pub fn open_position(
        &mut self,
        collateral_amount: Decimal,
        busd_amount: Decimal,
    ) -> Result<(Bucket, Bucket), RuntimeError> {
        let collateral = self.xrd.take(collateral_amount, &mut self.env)?;
        self.ballast
            .open_position(collateral, busd_amount, dec!("0.05"), &mut self.env)
    }

    pub fn get_position_info(&mut self, position_id: NonFungibleLocalId) -> Result<PositionInfoReturn, RuntimeError> {
        let infos = self.ballast.get_position_infos(vec![position_id], &mut self.env)?;
        Ok(infos.first().unwrap().clone())
    }

    pub fn get_system_info(&mut self) -> Result<SystemInfoReturn, RuntimeError> {
        self.ballast.get_system_info(&mut self.env)
    }

    /////////////////////////////////////////////////
    //////////////// STABILITY POOL /////////////////
    /////////////////////////////////////////////////

    pub fn get_deposit_info(&mut self, deposit_id: NonFungibleLocalId) -> Result<DepositInfoReturn, RuntimeError> {
        let infos = self
            .stability_pool
            .get_deposit_infos(vec![deposit_id], &mut self.env)?;
        Ok(infos.first().unwrap().clone())
    }

    pub fn get_pool_info(&mut self) -> Result<PoolInfoReturn, RuntimeError> {
        self.stability_pool.get_pool_info(&mut self.env)
    }

    pub fn provide(
        &mut self,
        busd: Bucket,
        front_end_id: Option<NonFungibleLocalId>,
    ) -> Result<Bucket, RuntimeError> {
        let (badge, _, _) = self.stability_pool.provide(busd, None, front_end_id, &mut self.env)?;
        Ok(badge.unwrap())
    }

    /////////////////////////////////////////////////
    //////////////////// TEST HELPERS ///////////////
    /////////////////////////////////////////////////

    /// Moves the clock forward without publishing a new price.
    pub fn advance_minutes_without_price(&mut self, minutes: i64) {
        let new_time = self.env.get_current_time().add_minutes(minutes).unwrap();
        self.env.set_current_time(new_time);
    }

    pub fn change_collateral_price(&mut self, price: Decimal) -> Result<(), RuntimeError> {
        self.env.disable_auth_module();
        self.dummy_oracle.set_price(self.xrd_address, price, &mut self.env)?;
        self.env.enable_auth_module();

        Ok(())
    }

    /// Moves the clock forward and republishes the price, so it is not stale.
    pub fn advance_minutes(&mut self, minutes: i64, price: Decimal) -> Result<(), RuntimeError> {
        let new_time = self.env.get_current_time().add_minutes(minutes).unwrap();
        self.env.set_current_time(new_time);
        self.change_collateral_price(price)
    }

    pub fn assert_bucket_eq(
        &mut self,
        bucket: &Bucket,
        address: ResourceAddress,
        amount: Decimal,
    ) -> Result<(), RuntimeError> {
        assert_eq!(bucket.resource_address(&mut self.env)?, address);
        assert_eq!(bucket.amount(&mut self.env)?, amount);

        Ok(())
    }
}
