//! Account, account-statistics and balance tables.
//!
//! Balances are keyed `(owner, asset)`. Two flag tables drive the
//! maintenance sweep: one marks core balances changed since the last
//! sweep, the other marks accounts whose statistics need work (voting
//! stake or pending fees). Both are maintained here so callers can't
//! desynchronize them from the primary rows.

use fallible_iterator::FallibleIterator;
use heed::types::SerdeBincode;
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    state::Error,
    types::{Account, AccountId, AccountStatistics, AssetId, CORE_ASSET},
};

#[derive(Clone)]
pub struct Dbs {
    accounts: DatabaseUnique<SerdeBincode<AccountId>, SerdeBincode<Account>>,
    accounts_by_name:
        DatabaseUnique<SerdeBincode<String>, SerdeBincode<AccountId>>,
    stats: DatabaseUnique<
        SerdeBincode<AccountId>,
        SerdeBincode<AccountStatistics>,
    >,
    /// Accounts whose statistics the maintenance pass must visit.
    stats_maintenance_flags:
        DatabaseUnique<SerdeBincode<AccountId>, SerdeBincode<()>>,
    balances:
        DatabaseUnique<SerdeBincode<(AccountId, AssetId)>, SerdeBincode<u64>>,
    /// Core balances changed since the last maintenance sweep.
    balance_maintenance_flags:
        DatabaseUnique<SerdeBincode<(AccountId, AssetId)>, SerdeBincode<()>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 6;

    pub fn new(env: &Env, rwtxn: &mut RwTxn<'_>) -> Result<Self, Error> {
        Ok(Self {
            accounts: DatabaseUnique::create(env, rwtxn, "accounts")?,
            accounts_by_name: DatabaseUnique::create(
                env,
                rwtxn,
                "accounts_by_name",
            )?,
            stats: DatabaseUnique::create(env, rwtxn, "account_stats")?,
            stats_maintenance_flags: DatabaseUnique::create(
                env,
                rwtxn,
                "account_stats_maintenance_flags",
            )?,
            balances: DatabaseUnique::create(env, rwtxn, "account_balances")?,
            balance_maintenance_flags: DatabaseUnique::create(
                env,
                rwtxn,
                "account_balance_maintenance_flags",
            )?,
        })
    }

    pub fn try_get_account(
        &self,
        rotxn: &RoTxn,
        id: AccountId,
    ) -> Result<Option<Account>, Error> {
        Ok(self.accounts.try_get(rotxn, &id)?)
    }

    pub fn get_account(
        &self,
        rotxn: &RoTxn,
        id: AccountId,
    ) -> Result<Account, Error> {
        self.try_get_account(rotxn, id)?
            .ok_or(Error::MissingAccount(id))
    }

    pub fn try_get_account_by_name(
        &self,
        rotxn: &RoTxn,
        name: &str,
    ) -> Result<Option<AccountId>, Error> {
        Ok(self.accounts_by_name.try_get(rotxn, &name.to_owned())?)
    }

    /// Insert a new account and its zeroed statistics row.
    pub fn insert_account(
        &self,
        rwtxn: &mut RwTxn,
        id: AccountId,
        account: &Account,
    ) -> Result<(), Error> {
        self.accounts.put(rwtxn, &id, account)?;
        self.accounts_by_name.put(rwtxn, &account.name, &id)?;
        let stats = AccountStatistics {
            owner: id,
            ..AccountStatistics::default()
        };
        self.put_stats(rwtxn, &stats)?;
        Ok(())
    }

    pub fn put_account(
        &self,
        rwtxn: &mut RwTxn,
        id: AccountId,
        account: &Account,
    ) -> Result<(), Error> {
        self.accounts.put(rwtxn, &id, account)?;
        Ok(())
    }

    /// Read-modify-write an account record.
    pub fn modify_account<F>(
        &self,
        rwtxn: &mut RwTxn,
        id: AccountId,
        f: F,
    ) -> Result<Account, Error>
    where
        F: FnOnce(&mut Account),
    {
        let mut account = self.get_account(rwtxn, id)?;
        f(&mut account);
        self.accounts.put(rwtxn, &id, &account)?;
        Ok(account)
    }

    pub fn get_stats(
        &self,
        rotxn: &RoTxn,
        id: AccountId,
    ) -> Result<AccountStatistics, Error> {
        self.stats
            .try_get(rotxn, &id)?
            .ok_or(Error::MissingAccountStats(id))
    }

    /// Write a statistics row and refresh its maintenance flag.
    pub fn put_stats(
        &self,
        rwtxn: &mut RwTxn,
        stats: &AccountStatistics,
    ) -> Result<(), Error> {
        self.stats.put(rwtxn, &stats.owner, stats)?;
        if stats.has_some_core_voting() || stats.has_pending_fees() {
            self.stats_maintenance_flags.put(rwtxn, &stats.owner, &())?;
        } else {
            self.stats_maintenance_flags.delete(rwtxn, &stats.owner)?;
        }
        Ok(())
    }

    /// Read-modify-write a statistics row, refreshing its maintenance
    /// flag.
    pub fn modify_stats<F>(
        &self,
        rwtxn: &mut RwTxn,
        id: AccountId,
        f: F,
    ) -> Result<AccountStatistics, Error>
    where
        F: FnOnce(&mut AccountStatistics),
    {
        let mut stats = self.get_stats(rwtxn, id)?;
        f(&mut stats);
        self.put_stats(rwtxn, &stats)?;
        Ok(stats)
    }

    /// Accounts flagged for the statistics maintenance pass, in id order.
    pub fn flagged_stats(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<AccountId>, Error> {
        let mut ids: Vec<AccountId> =
            self.stats_maintenance_flags.iter(rotxn)?.map(|(id, ())| Ok(id)).collect()?;
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn balance(
        &self,
        rotxn: &RoTxn,
        owner: AccountId,
        asset: AssetId,
    ) -> Result<u64, Error> {
        Ok(self
            .balances
            .try_get(rotxn, &(owner, asset))?
            .unwrap_or(0))
    }

    /// Credit `amount` to an account's balance, flagging core balances
    /// for the next maintenance sweep.
    pub fn credit(
        &self,
        rwtxn: &mut RwTxn,
        owner: AccountId,
        asset: AssetId,
        amount: u64,
    ) -> Result<(), Error> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.balance(rwtxn, owner, asset)?;
        self.balances
            .put(rwtxn, &(owner, asset), &(balance + amount))?;
        if asset == CORE_ASSET {
            self.balance_maintenance_flags
                .put(rwtxn, &(owner, asset), &())?;
        }
        Ok(())
    }

    /// Debit `amount` from an account's balance.
    pub fn debit(
        &self,
        rwtxn: &mut RwTxn,
        owner: AccountId,
        asset: AssetId,
        amount: u64,
    ) -> Result<(), Error> {
        if amount == 0 {
            return Ok(());
        }
        let balance = self.balance(rwtxn, owner, asset)?;
        let remaining = balance.checked_sub(amount).ok_or(
            Error::InsufficientBalance {
                account: owner,
                asset,
                required: amount,
                available: balance,
            },
        )?;
        self.balances.put(rwtxn, &(owner, asset), &remaining)?;
        if asset == CORE_ASSET {
            self.balance_maintenance_flags
                .put(rwtxn, &(owner, asset), &())?;
        }
        Ok(())
    }

    /// Remove a balance row outright without touching supply; used only
    /// by the one-time supply-repair transform.
    pub fn remove_balance_row(
        &self,
        rwtxn: &mut RwTxn,
        owner: AccountId,
        asset: AssetId,
    ) -> Result<Option<u64>, Error> {
        let amount = self.balances.try_get(rwtxn, &(owner, asset))?;
        if amount.is_some() {
            self.balances.delete(rwtxn, &(owner, asset))?;
            self.balance_maintenance_flags
                .delete(rwtxn, &(owner, asset))?;
        }
        Ok(amount)
    }

    /// Balance rows flagged as changed since the last sweep, in key
    /// order.
    pub fn flagged_balances(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(AccountId, AssetId)>, Error> {
        let mut keys: Vec<(AccountId, AssetId)> = self
            .balance_maintenance_flags
            .iter(rotxn)?
            .map(|(key, ())| Ok(key))
            .collect()?;
        keys.sort_unstable();
        Ok(keys)
    }

    pub fn clear_balance_flag(
        &self,
        rwtxn: &mut RwTxn,
        owner: AccountId,
        asset: AssetId,
    ) -> Result<(), Error> {
        self.balance_maintenance_flags
            .delete(rwtxn, &(owner, asset))?;
        Ok(())
    }

    /// All balances held by one account, in asset order.
    pub fn balances_of(
        &self,
        rotxn: &RoTxn,
        owner: AccountId,
    ) -> Result<Vec<(AssetId, u64)>, Error> {
        let mut balances: Vec<(AssetId, u64)> = self
            .balances
            .iter(rotxn)?
            .filter_map(|((account, asset), amount)| {
                Ok((account == owner).then_some((asset, amount)))
            })
            .collect()?;
        balances.sort_unstable_by_key(|(asset, _)| *asset);
        Ok(balances)
    }

    /// The top `n` holders of `asset` by `(balance desc, owner asc)`,
    /// excluding `exclude` and zero balances.
    pub fn top_holders(
        &self,
        rotxn: &RoTxn,
        asset: AssetId,
        exclude: AccountId,
        n: usize,
    ) -> Result<Vec<(AccountId, u64)>, Error> {
        let mut holders: Vec<(AccountId, u64)> = self
            .balances
            .iter(rotxn)?
            .filter_map(|((owner, balance_asset), amount)| {
                Ok((balance_asset == asset
                    && owner != exclude
                    && amount > 0)
                    .then_some((owner, amount)))
            })
            .collect()?;
        holders.sort_unstable_by(|(owner_a, amount_a), (owner_b, amount_b)| {
            amount_b.cmp(amount_a).then(owner_a.cmp(owner_b))
        });
        holders.truncate(n);
        Ok(holders)
    }

    /// All accounts in id order.
    pub fn all_accounts(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(AccountId, Account)>, Error> {
        let mut accounts: Vec<(AccountId, Account)> =
            self.accounts.iter(rotxn)?.collect()?;
        accounts.sort_unstable_by_key(|(id, _)| *id);
        Ok(accounts)
    }
}
