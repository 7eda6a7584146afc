//! Governance object tables: producers, committee members, workers,
//! custom authorities and the special-authority registry.

use fallible_iterator::FallibleIterator;
use heed::types::SerdeBincode;
use sneed::{DatabaseUnique, Env, RoTxn, RwTxn};

use crate::{
    state::Error,
    types::{
        AccountId, CommitteeMember, CommitteeMemberId, CustomAuthority,
        CustomAuthorityId, Producer, ProducerId, Worker, WorkerId,
    },
};

#[derive(Clone)]
pub struct Dbs {
    producers: DatabaseUnique<SerdeBincode<ProducerId>, SerdeBincode<Producer>>,
    producers_by_account:
        DatabaseUnique<SerdeBincode<AccountId>, SerdeBincode<ProducerId>>,
    committee_members: DatabaseUnique<
        SerdeBincode<CommitteeMemberId>,
        SerdeBincode<CommitteeMember>,
    >,
    workers: DatabaseUnique<SerdeBincode<WorkerId>, SerdeBincode<Worker>>,
    custom_authorities: DatabaseUnique<
        SerdeBincode<CustomAuthorityId>,
        SerdeBincode<CustomAuthority>,
    >,
    /// Accounts carrying a special authority on either slot.
    special_authority_accounts:
        DatabaseUnique<SerdeBincode<AccountId>, SerdeBincode<()>>,
}

impl Dbs {
    pub const NUM_DBS: u32 = 6;

    pub fn new(env: &Env, rwtxn: &mut RwTxn<'_>) -> Result<Self, Error> {
        Ok(Self {
            producers: DatabaseUnique::create(env, rwtxn, "producers")?,
            producers_by_account: DatabaseUnique::create(
                env,
                rwtxn,
                "producers_by_account",
            )?,
            committee_members: DatabaseUnique::create(
                env,
                rwtxn,
                "committee_members",
            )?,
            workers: DatabaseUnique::create(env, rwtxn, "workers")?,
            custom_authorities: DatabaseUnique::create(
                env,
                rwtxn,
                "custom_authorities",
            )?,
            special_authority_accounts: DatabaseUnique::create(
                env,
                rwtxn,
                "special_authority_accounts",
            )?,
        })
    }

    pub fn get_producer(
        &self,
        rotxn: &RoTxn,
        id: ProducerId,
    ) -> Result<Producer, Error> {
        self.producers
            .try_get(rotxn, &id)?
            .ok_or(Error::MissingProducer(id))
    }

    pub fn insert_producer(
        &self,
        rwtxn: &mut RwTxn,
        id: ProducerId,
        producer: &Producer,
    ) -> Result<(), Error> {
        self.producers.put(rwtxn, &id, producer)?;
        self.producers_by_account
            .put(rwtxn, &producer.account, &id)?;
        Ok(())
    }

    pub fn put_producer(
        &self,
        rwtxn: &mut RwTxn,
        id: ProducerId,
        producer: &Producer,
    ) -> Result<(), Error> {
        self.producers.put(rwtxn, &id, producer)?;
        Ok(())
    }

    pub fn producer_by_account(
        &self,
        rotxn: &RoTxn,
        account: AccountId,
    ) -> Result<Option<ProducerId>, Error> {
        Ok(self.producers_by_account.try_get(rotxn, &account)?)
    }

    pub fn all_producers(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(ProducerId, Producer)>, Error> {
        let mut producers: Vec<(ProducerId, Producer)> =
            self.producers.iter(rotxn)?.collect()?;
        producers.sort_unstable_by_key(|(id, _)| *id);
        Ok(producers)
    }

    pub fn get_committee_member(
        &self,
        rotxn: &RoTxn,
        id: CommitteeMemberId,
    ) -> Result<CommitteeMember, Error> {
        self.committee_members
            .try_get(rotxn, &id)?
            .ok_or(Error::MissingCommitteeMember(id))
    }

    pub fn put_committee_member(
        &self,
        rwtxn: &mut RwTxn,
        id: CommitteeMemberId,
        member: &CommitteeMember,
    ) -> Result<(), Error> {
        self.committee_members.put(rwtxn, &id, member)?;
        Ok(())
    }

    pub fn all_committee_members(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(CommitteeMemberId, CommitteeMember)>, Error> {
        let mut members: Vec<(CommitteeMemberId, CommitteeMember)> =
            self.committee_members.iter(rotxn)?.collect()?;
        members.sort_unstable_by_key(|(id, _)| *id);
        Ok(members)
    }

    pub fn get_worker(
        &self,
        rotxn: &RoTxn,
        id: WorkerId,
    ) -> Result<Worker, Error> {
        self.workers
            .try_get(rotxn, &id)?
            .ok_or(Error::MissingWorker(id))
    }

    pub fn put_worker(
        &self,
        rwtxn: &mut RwTxn,
        id: WorkerId,
        worker: &Worker,
    ) -> Result<(), Error> {
        self.workers.put(rwtxn, &id, worker)?;
        Ok(())
    }

    pub fn all_workers(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(WorkerId, Worker)>, Error> {
        let mut workers: Vec<(WorkerId, Worker)> =
            self.workers.iter(rotxn)?.collect()?;
        workers.sort_unstable_by_key(|(id, _)| *id);
        Ok(workers)
    }

    /// Workers sponsored by one account, in id order.
    pub fn workers_by_account(
        &self,
        rotxn: &RoTxn,
        account: AccountId,
    ) -> Result<Vec<(WorkerId, Worker)>, Error> {
        let mut workers: Vec<(WorkerId, Worker)> = self
            .workers
            .iter(rotxn)?
            .filter_map(|(id, worker)| {
                Ok((worker.account == account).then_some((id, worker)))
            })
            .collect()?;
        workers.sort_unstable_by_key(|(id, _)| *id);
        Ok(workers)
    }

    pub fn put_custom_authority(
        &self,
        rwtxn: &mut RwTxn,
        id: CustomAuthorityId,
        auth: &CustomAuthority,
    ) -> Result<(), Error> {
        self.custom_authorities.put(rwtxn, &id, auth)?;
        Ok(())
    }

    pub fn remove_custom_authority(
        &self,
        rwtxn: &mut RwTxn,
        id: CustomAuthorityId,
    ) -> Result<bool, Error> {
        Ok(self.custom_authorities.delete(rwtxn, &id)?)
    }

    pub fn all_custom_authorities(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<(CustomAuthorityId, CustomAuthority)>, Error> {
        let mut auths: Vec<(CustomAuthorityId, CustomAuthority)> =
            self.custom_authorities.iter(rotxn)?.collect()?;
        auths.sort_unstable_by_key(|(id, _)| *id);
        Ok(auths)
    }

    /// Custom authorities already expired at `now`, ordered by
    /// `(valid_to, id)` the way the expiry sweep visits them.
    pub fn expired_custom_authorities(
        &self,
        rotxn: &RoTxn,
        now: u64,
    ) -> Result<Vec<CustomAuthorityId>, Error> {
        let mut expired: Vec<(u64, CustomAuthorityId)> = self
            .custom_authorities
            .iter(rotxn)?
            .filter_map(|(id, auth)| {
                Ok((auth.valid_to < now).then_some((auth.valid_to, id)))
            })
            .collect()?;
        expired.sort_unstable();
        Ok(expired.into_iter().map(|(_, id)| id).collect())
    }

    pub fn insert_special_authority_account(
        &self,
        rwtxn: &mut RwTxn,
        account: AccountId,
    ) -> Result<(), Error> {
        self.special_authority_accounts.put(rwtxn, &account, &())?;
        Ok(())
    }

    pub fn remove_special_authority_account(
        &self,
        rwtxn: &mut RwTxn,
        account: AccountId,
    ) -> Result<bool, Error> {
        Ok(self.special_authority_accounts.delete(rwtxn, &account)?)
    }

    /// Accounts registered as carrying a special authority, in id order.
    pub fn special_authority_accounts(
        &self,
        rotxn: &RoTxn,
    ) -> Result<Vec<AccountId>, Error> {
        let mut ids: Vec<AccountId> = self
            .special_authority_accounts
            .iter(rotxn)?
            .map(|(id, ())| Ok(id))
            .collect()?;
        ids.sort_unstable();
        Ok(ids)
    }
}
