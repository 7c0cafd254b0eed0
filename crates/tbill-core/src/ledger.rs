use std::collections::BTreeMap;

use hex::ToHex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TBillError;
use crate::policy::{InterestPolicy, PolicyRegistry, INTEREST_RATE_DECIMALS, RATE_SCALE};
use crate::token::{AccountId, Amount, TokenError, TokenTransferPort};

/// A live fixed-term deposit earning its locked-in rate until release.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Holding {
    /// Position of this holding in its owner's live set. Ids are reused:
    /// redeeming any holding other than the last one moves the last holding
    /// into the freed slot and rewrites its id (see [`TBillLedger::redeem`]).
    /// Never unique across owners, never stable across removals.
    pub id: usize,
    pub owner: AccountId,
    /// Rate copied from the matching policy at purchase time; later policy
    /// updates never touch it.
    pub interest_rate: u64,
    /// Locked principal.
    pub spot_token_amount: Amount,
    /// Redemption is refused strictly before this instant.
    pub release_timestamp: u64,
}

/// Outcome of a successful redemption.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Redemption {
    pub principal: Amount,
    pub interest: Amount,
}

/// Fixed construction parameters of a ledger instance.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Account that pre-authorizes the ledger to pull interest payouts.
    pub interest_fund_address: AccountId,
    /// Identity of the token contract the ledger moves value through.
    pub token_address: AccountId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    PolicyUpdated {
        period: u64,
        interest_rate: u64,
    },
    Purchased {
        owner: AccountId,
        id: usize,
        amount: Amount,
        interest_rate: u64,
        release_timestamp: u64,
    },
    Redeemed {
        owner: AccountId,
        id: usize,
        principal: Amount,
        interest: Amount,
    },
}

/// Serializable view of the full ledger state plus an integrity digest.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub config: LedgerConfig,
    pub policies: Vec<InterestPolicy>,
    pub holdings: BTreeMap<AccountId, Vec<Holding>>,
    pub total_locked_tokens: Amount,
    pub events: Vec<LedgerEvent>,
    pub state_digest: [u8; 32],
}

impl LedgerSnapshot {
    /// Render the state digest as a hex string.
    pub fn digest_hex(&self) -> String {
        self.state_digest.encode_hex()
    }
}

/// The holding ledger: per-owner holding storage, buy/redeem transitions, and
/// the running total of locked principal.
///
/// The ledger is a sequentially-applied state machine. Mutating operations
/// take `&mut self`, so a single owner serializes them by construction; share
/// an instance behind a `Mutex` when concurrent callers need access. Every
/// operation either fully completes or fails before the first state mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TBillLedger<T> {
    config: LedgerConfig,
    token: T,
    policies: PolicyRegistry,
    holdings: BTreeMap<AccountId, Vec<Holding>>,
    total_locked_tokens: Amount,
    events: Vec<LedgerEvent>,
}

impl<T: TokenTransferPort> TBillLedger<T> {
    pub fn new(config: LedgerConfig, token: T) -> Self {
        Self {
            config,
            token,
            policies: PolicyRegistry::new(),
            holdings: BTreeMap::new(),
            total_locked_tokens: 0,
            events: Vec::new(),
        }
    }

    pub fn interest_rate_decimals(&self) -> u32 {
        INTEREST_RATE_DECIMALS
    }

    pub fn interest_fund_address(&self) -> &str {
        &self.config.interest_fund_address
    }

    pub fn token_address(&self) -> &str {
        &self.config.token_address
    }

    /// Balance of the interest-funding account at the token collaborator.
    pub fn interest_fund_balance(&self) -> Amount {
        self.token.balance_of(&self.config.interest_fund_address)
    }

    pub fn total_locked(&self) -> Amount {
        self.total_locked_tokens
    }

    pub fn policies(&self) -> &[InterestPolicy] {
        self.policies.policies()
    }

    pub fn rate_for(&self, period: u64) -> Option<u64> {
        self.policies.rate_for(period)
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    /// Register or update the interest policy for `period`.
    pub fn set_rate(&mut self, period: u64, interest_rate: u64) -> Result<(), TBillError> {
        self.policies.set_rate(period, interest_rate)?;
        self.events.push(LedgerEvent::PolicyUpdated {
            period,
            interest_rate,
        });
        Ok(())
    }

    /// Current holdings of `owner`; ids reflect current positions.
    pub fn holdings_of(&self, owner: &str) -> &[Holding] {
        self.holdings.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The holding at `id` for `owner`, if live.
    pub fn holding_by_id(&self, owner: &str, id: usize) -> Option<&Holding> {
        self.holdings.get(owner).and_then(|holdings| holdings.get(id))
    }

    /// Lock `amount` tokens of `owner` for `period` seconds at the currently
    /// registered rate.
    ///
    /// Pulls the principal into ledger custody through the token collaborator;
    /// if that pull fails, no holding is created and no ledger state changes.
    pub fn buy(
        &mut self,
        owner: &str,
        amount: Amount,
        period: u64,
        now: u64,
    ) -> Result<Holding, TBillError> {
        if amount == 0 {
            return Err(TBillError::InvalidAmount);
        }
        let interest_rate = self
            .policies
            .rate_for(period)
            .ok_or(TBillError::NoMatchingPolicy { period })?;

        let custody = self.token.custody_account().to_string();
        self.token
            .transfer_from(owner, &custody, amount)
            .map_err(|source| TBillError::PrincipalTransferFailed { source })?;

        let holdings = self.holdings.entry(owner.to_string()).or_default();
        let holding = Holding {
            id: holdings.len(),
            owner: owner.to_string(),
            interest_rate,
            spot_token_amount: amount,
            release_timestamp: now + period,
        };
        holdings.push(holding.clone());
        self.total_locked_tokens += amount;
        self.events.push(LedgerEvent::Purchased {
            owner: holding.owner.clone(),
            id: holding.id,
            amount,
            interest_rate,
            release_timestamp: holding.release_timestamp,
        });
        Ok(holding)
    }

    /// Redeem the holding at `id` for principal plus interest.
    ///
    /// Interest is `floor(principal * rate / RATE_SCALE)`, pulled from the
    /// interest fund before the principal leaves custody; an underfunded or
    /// under-authorized fund therefore aborts the redemption before any token
    /// has moved. On any failure the holding stays live and the locked total
    /// is unchanged, and the caller may retry once the fund is topped up.
    ///
    /// Removal is swap-and-truncate: the last holding moves into the freed
    /// slot and its id is rewritten to the freed index.
    pub fn redeem(&mut self, owner: &str, id: usize, now: u64) -> Result<Redemption, TBillError> {
        let (principal, interest_rate, release_timestamp) =
            match self.holdings.get(owner).and_then(|holdings| holdings.get(id)) {
                Some(holding) => (
                    holding.spot_token_amount,
                    holding.interest_rate,
                    holding.release_timestamp,
                ),
                None => return Err(TBillError::HoldingNotFound { id }),
            };
        if now < release_timestamp {
            return Err(TBillError::NotYetReleased {
                release_timestamp,
                now,
            });
        }
        let interest = (principal as u128 * interest_rate as u128 / RATE_SCALE as u128) as u64;

        let custody = self.token.custody_account().to_string();
        if self.token.balance_of(&custody) < principal {
            return Err(TBillError::PrincipalTransferFailed {
                source: TokenError::InsufficientBalance { account: custody },
            });
        }
        let fund = self.config.interest_fund_address.clone();
        self.token
            .transfer_from(&fund, owner, interest)
            .map_err(|source| TBillError::InterestTransferFailed { source })?;
        self.token
            .transfer(owner, principal)
            .map_err(|source| TBillError::PrincipalTransferFailed { source })?;

        if let Some(holdings) = self.holdings.get_mut(owner) {
            holdings.swap_remove(id);
            if let Some(moved) = holdings.get_mut(id) {
                moved.id = id;
            }
            if holdings.is_empty() {
                self.holdings.remove(owner);
            }
        }
        self.total_locked_tokens -= principal;
        self.events.push(LedgerEvent::Redeemed {
            owner: owner.to_string(),
            id,
            principal,
            interest,
        });
        Ok(Redemption {
            principal,
            interest,
        })
    }

    /// Consistent view of the full ledger state with its integrity digest.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            config: self.config.clone(),
            policies: self.policies.policies().to_vec(),
            holdings: self.holdings.clone(),
            total_locked_tokens: self.total_locked_tokens,
            events: self.events.clone(),
            state_digest: self.state_digest(),
        }
    }

    fn state_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for policy in self.policies.policies() {
            hasher.update(b"policy");
            hasher.update(policy.period.to_le_bytes());
            hasher.update(policy.interest_rate.to_le_bytes());
        }
        for (owner, holdings) in &self.holdings {
            for holding in holdings {
                hasher.update(b"holding");
                hasher.update(owner.as_bytes());
                hasher.update((holding.id as u64).to_le_bytes());
                hasher.update(holding.interest_rate.to_le_bytes());
                hasher.update(holding.spot_token_amount.to_le_bytes());
                hasher.update(holding.release_timestamp.to_le_bytes());
            }
        }
        hasher.update(b"total");
        hasher.update(self.total_locked_tokens.to_le_bytes());
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::InMemoryToken;

    const DAY: u64 = 86_400;
    const NOW: u64 = 1_700_000_000;

    fn new_ledger() -> TBillLedger<InMemoryToken> {
        TBillLedger::new(
            LedgerConfig {
                interest_fund_address: "interest-fund".into(),
                token_address: "spot-token".into(),
            },
            InMemoryToken::new("tbill-custody"),
        )
    }

    fn assert_locked_total_consistent(ledger: &TBillLedger<InMemoryToken>) {
        let snapshot = ledger.snapshot();
        let held: Amount = snapshot
            .holdings
            .values()
            .flatten()
            .map(|h| h.spot_token_amount)
            .sum();
        assert_eq!(ledger.total_locked(), held);
        assert_eq!(ledger.total_locked(), ledger.token().balance_of("tbill-custody"));
    }

    #[test]
    fn new_ledger_reports_its_constants() {
        let ledger = new_ledger();
        assert_eq!(ledger.interest_rate_decimals(), 6);
        assert_eq!(ledger.interest_fund_address(), "interest-fund");
        assert_eq!(ledger.token_address(), "spot-token");
        assert_eq!(ledger.total_locked(), 0);
        assert!(ledger.policies().is_empty());
        assert_eq!(ledger.interest_fund_balance(), 0);
    }

    #[test]
    fn buying_locks_tokens_and_records_the_holding() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 150_000).unwrap();
        ledger.token_mut().mint("user1", 666);
        ledger.token_mut().mint("user2", 777);

        ledger.token_mut().approve("user1", "tbill-custody", 10);
        let holding = ledger.buy("user1", 10, 30 * DAY, NOW).unwrap();

        assert_eq!(ledger.token().balance_of("user1"), 656);
        assert_eq!(ledger.token().balance_of("tbill-custody"), 10);
        assert_eq!(ledger.total_locked(), 10);
        assert_eq!(holding.id, 0);
        assert_eq!(holding.owner, "user1");
        assert_eq!(holding.interest_rate, 150_000);
        assert_eq!(holding.spot_token_amount, 10);
        assert_eq!(holding.release_timestamp, NOW + 30 * DAY);
        assert_eq!(ledger.holdings_of("user1"), [holding]);

        ledger.token_mut().approve("user2", "tbill-custody", 50);
        ledger.buy("user2", 50, 30 * DAY, NOW).unwrap();

        assert_eq!(ledger.token().balance_of("user2"), 727);
        assert_eq!(ledger.token().balance_of("tbill-custody"), 60);
        assert_eq!(ledger.total_locked(), 60);
        // ids are per owner: user2's first holding also starts at 0
        assert_eq!(ledger.holdings_of("user2").len(), 1);
        assert_eq!(ledger.holdings_of("user2")[0].id, 0);
        assert_eq!(ledger.holdings_of("user2")[0].spot_token_amount, 50);
        assert_locked_total_consistent(&ledger);
    }

    #[test]
    fn buy_rejects_zero_amount_and_unknown_period() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 150_000).unwrap();
        ledger.token_mut().mint("user1", 100);

        assert_eq!(
            ledger.buy("user1", 0, 30 * DAY, NOW),
            Err(TBillError::InvalidAmount)
        );
        assert_eq!(
            ledger.buy("user1", 10, 7 * DAY, NOW),
            Err(TBillError::NoMatchingPolicy { period: 7 * DAY })
        );
        assert!(ledger.holdings_of("user1").is_empty());
        assert_eq!(ledger.total_locked(), 0);
    }

    #[test]
    fn failed_principal_pull_leaves_no_trace() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 150_000).unwrap();
        ledger.token_mut().mint("user1", 100);

        // no allowance granted
        let err = ledger.buy("user1", 10, 30 * DAY, NOW).unwrap_err();
        assert!(matches!(err, TBillError::PrincipalTransferFailed { .. }));
        assert!(ledger.holdings_of("user1").is_empty());
        assert_eq!(ledger.total_locked(), 0);
        assert_eq!(ledger.token().balance_of("user1"), 100);
        // only the policy registration made it into the event log
        assert_eq!(ledger.events().len(), 1);
    }

    #[test]
    fn interest_rate_is_locked_at_purchase() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 15_000).unwrap();
        ledger.token_mut().mint("user1", 100);
        ledger.token_mut().approve("user1", "tbill-custody", 100);
        ledger.buy("user1", 100, 30 * DAY, NOW).unwrap();

        ledger.set_rate(30 * DAY, 999_999).unwrap();
        assert_eq!(ledger.holdings_of("user1")[0].interest_rate, 15_000);
    }

    #[test]
    fn redeem_is_refused_before_release() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 15_000).unwrap();
        ledger.token_mut().mint("user1", 100);
        ledger.token_mut().approve("user1", "tbill-custody", 100);
        ledger.buy("user1", 100, 30 * DAY, NOW).unwrap();

        for now in [NOW, NOW + 29 * DAY] {
            assert_eq!(
                ledger.redeem("user1", 0, now),
                Err(TBillError::NotYetReleased {
                    release_timestamp: NOW + 30 * DAY,
                    now,
                })
            );
        }
        assert_eq!(ledger.holdings_of("user1").len(), 1);
        assert_eq!(ledger.total_locked(), 100);
    }

    #[test]
    fn redeem_pays_principal_plus_interest() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 15_000).unwrap();
        ledger.token_mut().mint("owner", 10_000);
        ledger.token_mut().approve("owner", "tbill-custody", 10_000);
        ledger.buy("owner", 10_000, 30 * DAY, NOW).unwrap();

        ledger.token_mut().mint("interest-fund", 150);
        ledger.token_mut().approve("interest-fund", "tbill-custody", 150);

        let redemption = ledger.redeem("owner", 0, NOW + 30 * DAY).unwrap();
        assert_eq!(
            redemption,
            Redemption {
                principal: 10_000,
                interest: 150,
            }
        );
        assert_eq!(ledger.token().balance_of("owner"), 10_150);
        assert_eq!(ledger.interest_fund_balance(), 0);
        assert_eq!(ledger.total_locked(), 0);
        assert!(ledger.holdings_of("owner").is_empty());
        assert_locked_total_consistent(&ledger);

        assert_eq!(
            ledger.redeem("owner", 0, NOW + 30 * DAY),
            Err(TBillError::HoldingNotFound { id: 0 })
        );
    }

    #[test]
    fn underfunded_interest_fund_aborts_redemption() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 15_000).unwrap();
        ledger.token_mut().mint("owner", 10_000);
        ledger.token_mut().approve("owner", "tbill-custody", 10_000);
        ledger.buy("owner", 10_000, 30 * DAY, NOW).unwrap();

        // fund holds enough but authorized too little
        ledger.token_mut().mint("interest-fund", 150);
        ledger.token_mut().approve("interest-fund", "tbill-custody", 100);

        let err = ledger.redeem("owner", 0, NOW + 30 * DAY).unwrap_err();
        assert!(matches!(err, TBillError::InterestTransferFailed { .. }));
        assert_eq!(ledger.holdings_of("owner").len(), 1);
        assert_eq!(ledger.total_locked(), 10_000);
        assert_eq!(ledger.token().balance_of("owner"), 0);
        assert_eq!(ledger.interest_fund_balance(), 150);
        assert_locked_total_consistent(&ledger);

        // retry succeeds once the fund authorizes the full payout
        ledger.token_mut().approve("interest-fund", "tbill-custody", 150);
        let redemption = ledger.redeem("owner", 0, NOW + 30 * DAY).unwrap();
        assert_eq!(redemption.interest, 150);
        assert_eq!(ledger.token().balance_of("owner"), 10_150);
    }

    #[test]
    fn redeeming_reassigns_the_last_holding_id() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 0).unwrap();
        ledger.token_mut().mint("owner", 600);
        ledger.token_mut().approve("owner", "tbill-custody", 600);
        for amount in [100, 200, 300] {
            ledger.buy("owner", amount, 30 * DAY, NOW).unwrap();
        }
        let ids: Vec<usize> = ledger.holdings_of("owner").iter().map(|h| h.id).collect();
        assert_eq!(ids, [0, 1, 2]);

        ledger.redeem("owner", 0, NOW + 30 * DAY).unwrap();
        // the holding formerly at id 2 now sits at id 0
        let holdings = ledger.holdings_of("owner");
        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].id, 0);
        assert_eq!(holdings[0].spot_token_amount, 300);
        assert_eq!(holdings[1].id, 1);
        assert_eq!(holdings[1].spot_token_amount, 200);

        let redemption = ledger.redeem("owner", 0, NOW + 30 * DAY).unwrap();
        assert_eq!(redemption.principal, 300);
        let remaining = ledger.holdings_of("owner");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 0);
        assert_eq!(remaining[0].spot_token_amount, 200);
        assert_locked_total_consistent(&ledger);
    }

    #[test]
    fn owners_are_isolated() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 0).unwrap();
        for owner in ["alice", "bob"] {
            ledger.token_mut().mint(owner, 1_000);
            ledger.token_mut().approve(owner, "tbill-custody", 1_000);
            ledger.buy(owner, 1_000, 30 * DAY, NOW).unwrap();
        }

        ledger.redeem("alice", 0, NOW + 30 * DAY).unwrap();

        assert!(ledger.holdings_of("alice").is_empty());
        let bob = ledger.holdings_of("bob");
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].id, 0);
        assert_eq!(bob[0].spot_token_amount, 1_000);
        assert_eq!(ledger.token().balance_of("bob"), 0);
        assert_eq!(ledger.total_locked(), 1_000);
        assert_locked_total_consistent(&ledger);
    }

    #[test]
    fn holding_lookup_by_id() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 15_000).unwrap();
        ledger.token_mut().mint("owner", 500);
        ledger.token_mut().approve("owner", "tbill-custody", 500);
        ledger.buy("owner", 200, 30 * DAY, NOW).unwrap();
        ledger.buy("owner", 300, 30 * DAY, NOW).unwrap();

        assert_eq!(ledger.holding_by_id("owner", 1).map(|h| h.spot_token_amount), Some(300));
        assert!(ledger.holding_by_id("owner", 2).is_none());
        assert!(ledger.holding_by_id("stranger", 0).is_none());
    }

    #[test]
    fn snapshot_digest_tracks_state() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 15_000).unwrap();
        let before = ledger.snapshot();
        assert_eq!(before.state_digest, ledger.snapshot().state_digest);
        assert_eq!(before.digest_hex().len(), 64);

        ledger.token_mut().mint("owner", 100);
        ledger.token_mut().approve("owner", "tbill-custody", 100);
        ledger.buy("owner", 100, 30 * DAY, NOW).unwrap();
        let after = ledger.snapshot();
        assert_ne!(before.state_digest, after.state_digest);
        assert_eq!(after.total_locked_tokens, 100);
    }

    #[test]
    fn events_record_successful_mutations() {
        let mut ledger = new_ledger();
        ledger.set_rate(30 * DAY, 15_000).unwrap();
        ledger.token_mut().mint("owner", 100);
        ledger.token_mut().approve("owner", "tbill-custody", 100);
        ledger.buy("owner", 100, 30 * DAY, NOW).unwrap();
        ledger.token_mut().approve("interest-fund", "tbill-custody", 10);
        ledger.token_mut().mint("interest-fund", 10);
        ledger.redeem("owner", 0, NOW + 30 * DAY).unwrap();

        let events = ledger.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            LedgerEvent::Redeemed {
                owner: "owner".into(),
                id: 0,
                principal: 100,
                interest: 1,
            }
        );
        let json = serde_json::to_value(&events[1]).unwrap();
        assert_eq!(json["type"], "purchased");
        assert_eq!(json["amount"], 100);
    }
}
