//! Asset, bitasset, FBA-accumulator, buyback and ticket tables.

use fallible_iterator::FallibleIterator;
use heed::types::SerdeBincode;
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    state::Error,
    types::{
        Asset, AssetDynamicData, AssetId, BitassetData, FbaAccumulator,
        FbaId, Ticket, TicketId,
    },
};

#[derive(Clone)]
pub struct Dbs {
    assets: DatabaseUnique<SerdeBincode<AssetId>, SerdeBincode<Asset>>,
    dynamic_data:
        DatabaseUnique<SerdeBincode<AssetId>, SerdeBincode<AssetDynamicData>>,
    bitassets:
        DatabaseUnique<SerdeBincode<AssetId>, SerdeBincode<BitassetData>>,
    fba_accumulators:
        DatabaseUnique<SerdeBincode<FbaId>, SerdeBincode<FbaAccumulator>>,
    /// Assets configured for buyback; the buyback account lives on the
    /// asset record.
    buybacks: DatabaseUnique<SerdeBincode<AssetId>, SerdeBincode<()>>,
    tickets: DatabaseUnique<SerdeBincode<TicketId>, SerdeBincode<Ticket>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 6;

    pub fn new(env: &Env, rwtxn: &mut RwTxn<'_>) -> Result<Self, Error> {
        Ok(Self {
            assets: DatabaseUnique::create(env, rwtxn, "assets")?,
            dynamic_data: DatabaseUnique::create(
                env,
                rwtxn,
                "asset_dynamic_data",
            )?,
            bitassets: DatabaseUnique::create(env, rwtxn, "bitassets")?,
            fba_accumulators: DatabaseUnique::create(
                env,
                rwtxn,
                "fba_accumulators",
            )?,
            buybacks: DatabaseUnique::create(env, rwtxn, "buybacks")?,
            tickets: DatabaseUnique::create(env, rwtxn, "tickets")?,
        })
    }

    pub fn try_get_asset(
        &self,
        rotxn: &RoTxn,
        id: AssetId,
    ) -> Result<Option<Asset>, Error> {
        Ok(self.assets.try_get(rotxn, &id)?)
    }

    pub fn get_asset(
        &self,
        rotxn: &RoTxn,
        id: AssetId,
    ) -> Result<Asset, Error> {
        self.try_get_asset(rotxn, id)?.ok_or(Error::MissingAsset(id))
    }

    pub fn put_asset(
        &self,
        rwtxn: &mut RwTxn,
        id: AssetId,
        asset: &Asset,
    ) -> Result<(), Error> {
        self.assets.put(rwtxn, &id, asset)?;
        Ok(())
    }

    pub fn modify_asset<F>(
        &self,
        rwtxn: &mut RwTxn,
        id: AssetId,
        f: F,
    ) -> Result<Asset, Error>
    where
        F: FnOnce(&mut Asset),
    {
        let mut asset = self.get_asset(rwtxn, id)?;
        f(&mut asset);
        self.assets.put(rwtxn, &id, &asset)?;
        Ok(asset)
    }

    pub fn get_dynamic_data(
        &self,
        rotxn: &RoTxn,
        id: AssetId,
    ) -> Result<AssetDynamicData, Error> {
        self.dynamic_data
            .try_get(rotxn, &id)?
            .ok_or(Error::MissingDynamicData(id))
    }

    pub fn put_dynamic_data(
        &self,
        rwtxn: &mut RwTxn,
        id: AssetId,
        data: &AssetDynamicData,
    ) -> Result<(), Error> {
        self.dynamic_data.put(rwtxn, &id, data)?;
        Ok(())
    }

    pub fn modify_dynamic_data<F>(
        &self,
        rwtxn: &mut RwTxn,
        id: AssetId,
        f: F,
    ) -> Result<AssetDynamicData, Error>
    where
        F: FnOnce(&mut AssetDynamicData),
    {
        let mut data = self.get_dynamic_data(rwtxn, id)?;
        f(&mut data);
        self.dynamic_data.put(rwtxn, &id, &data)?;
        Ok(data)
    }

    pub fn try_get_bitasset(
        &self,
        rotxn: &RoTxn,
        id: AssetId,
    ) -> Result<Option<BitassetData>, Error> {
        Ok(self.bitassets.try_get(rotxn, &id)?)
    }

    pub fn get_bitasset(
        &self,
        rotxn: &RoTxn,
        id: AssetId,
    ) -> Result<BitassetData, Error> {
        self.try_get_bitasset(rotxn, id)?
            .ok_or(Error::MissingBitasset(id))
    }

    pub fn put_bitasset(
        &self,
        rwtxn: &mut RwTxn,
        id: AssetId,
        bitasset: &BitassetData,
    ) -> Result<(), Error> {
        self.bitassets.put(rwtxn, &id, bitasset)?;
        Ok(())
    }

    pub fn modify_bitasset<F>(
        &self,
        rwtxn: &mut RwTxn,
        id: AssetId,
        f: F,
    ) -> Result<BitassetData, Error>
    where
        F: FnOnce(&mut BitassetData),
    {
        let mut bitasset = self.get_bitasset(rwtxn, id)?;
        f(&mut bitasset);
        self.bitassets.put(rwtxn, &id, &bitasset)?;
        Ok(bitasset)
    }

    /// Ids of all market-issued assets, in id order.
    pub fn market_issued_assets(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<AssetId>, Error> {
        let mut ids: Vec<AssetId> = self
            .assets
            .iter(rotxn)?
            .filter_map(|(id, asset)| Ok(asset.market_issued.then_some(id)))
            .collect()?;
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn all_bitassets(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(AssetId, BitassetData)>, Error> {
        let mut bitassets: Vec<(AssetId, BitassetData)> =
            self.bitassets.iter(rotxn)?.collect()?;
        bitassets.sort_unstable_by_key(|(id, _)| *id);
        Ok(bitassets)
    }

    pub fn get_fba(
        &self,
        rotxn: &RoTxn,
        id: FbaId,
    ) -> Result<FbaAccumulator, Error> {
        self.fba_accumulators
            .try_get(rotxn, &id)?
            .ok_or(Error::MissingFba(id))
    }

    pub fn put_fba(
        &self,
        rwtxn: &mut RwTxn,
        id: FbaId,
        fba: &FbaAccumulator,
    ) -> Result<(), Error> {
        self.fba_accumulators.put(rwtxn, &id, fba)?;
        Ok(())
    }

    pub fn all_fbas(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(FbaId, FbaAccumulator)>, Error> {
        let mut fbas: Vec<(FbaId, FbaAccumulator)> =
            self.fba_accumulators.iter(rotxn)?.collect()?;
        fbas.sort_unstable_by_key(|(id, _)| *id);
        Ok(fbas)
    }

    pub fn insert_buyback(
        &self,
        rwtxn: &mut RwTxn,
        asset: AssetId,
    ) -> Result<(), Error> {
        self.buybacks.put(rwtxn, &asset, &())?;
        Ok(())
    }

    /// Assets configured for buyback, in id order.
    pub fn buyback_assets(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<AssetId>, Error> {
        let mut ids: Vec<AssetId> =
            self.buybacks.iter(rotxn)?.map(|(id, ())| Ok(id)).collect()?;
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn put_ticket(
        &self,
        rwtxn: &mut RwTxn,
        id: TicketId,
        ticket: &Ticket,
    ) -> Result<(), Error> {
        self.tickets.put(rwtxn, &id, ticket)?;
        Ok(())
    }

    pub fn all_tickets(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(TicketId, Ticket)>, Error> {
        let mut tickets: Vec<(TicketId, Ticket)> =
            self.tickets.iter(rotxn)?.collect()?;
        tickets.sort_unstable_by_key(|(id, _)| *id);
        Ok(tickets)
    }
}
