// DANS : tests/common/mod.rs

//! Registre en mémoire qui joue le rôle du cluster : transferts système,
//! transferts SPL, création idempotente d'ATA, fermeture de compte et frais
//! par signature. Les endpoints partagent le même registre et peuvent être
//! scriptés pour renvoyer des 429.

#![allow(dead_code)]

use async_trait::async_trait;
use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Keypair, signature::Signature, system_program,
    transaction::Transaction,
};
use spl_associated_token_account::get_associated_token_address;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tribify::config::{QueueConfig, ScanConfig};
use tribify::constants::{SYSTEM_ACCOUNT_RENT_LAMPORTS, TOKEN_ACCOUNT_RENT_LAMPORTS, TX_FEE_LAMPORTS};
use tribify::execution::queue::BatchTransactionQueue;
use tribify::rpc::{ChainClient, RpcEndpointPool};
use tribify::state::balance_scanner::BalanceScanner;
use tribify::wallet::derivation::{DerivedKeypair, derive_keypairs};
use tribify::wallet::signer::KeypairSigner;
use tribify::EngineError;

pub const RENT_EXEMPT_MINIMUM: u64 = SYSTEM_ACCOUNT_RENT_LAMPORTS;

const SYSTEM_TRANSFER: u32 = 2;
const TOKEN_TRANSFER: u8 = 3;
const TOKEN_CLOSE_ACCOUNT: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccount {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

#[derive(Debug, Default, Clone)]
struct LedgerState {
    lamports: HashMap<Pubkey, u64>,
    tokens: HashMap<Pubkey, TokenAccount>,
}

impl LedgerState {
    fn debit(&mut self, address: &Pubkey, amount: u64) -> Result<(), String> {
        let balance = self.lamports.entry(*address).or_insert(0);
        *balance = balance
            .checked_sub(amount)
            .ok_or_else(|| format!("insufficient lamports on {address}: need {amount}"))?;
        Ok(())
    }

    fn credit(&mut self, address: &Pubkey, amount: u64) {
        *self.lamports.entry(*address).or_insert(0) += amount;
    }
}

#[derive(Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
    rejected: Mutex<HashSet<Pubkey>>,
    rejected_closes: Mutex<HashSet<Pubkey>>,
    late_deposits: Mutex<HashMap<Pubkey, u64>>,
    landed: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn airdrop(&self, address: &Pubkey, lamports: u64) {
        self.state.lock().unwrap().credit(address, lamports);
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.state.lock().unwrap().lamports.get(address).copied().unwrap_or(0)
    }

    /// Crée l'ATA si besoin (loyer non débité) et y ajoute `amount` unités.
    pub fn mint_to(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) {
        let ata = get_associated_token_address(owner, mint);
        let mut state = self.state.lock().unwrap();
        if !state.tokens.contains_key(&ata) {
            state.credit(&ata, TOKEN_ACCOUNT_RENT_LAMPORTS);
        }
        state
            .tokens
            .entry(ata)
            .or_insert(TokenAccount { mint: *mint, owner: *owner, amount: 0 })
            .amount += amount;
    }

    /// Solde de l'ATA `owner`/`mint`, `None` si le compte n'existe pas.
    pub fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Option<u64> {
        let ata = get_associated_token_address(owner, mint);
        self.state.lock().unwrap().tokens.get(&ata).map(|a| a.amount)
    }

    /// Toute transaction qui référence `address` est rejetée par le « validateur ».
    pub fn reject_transactions_touching(&self, address: &Pubkey) {
        self.rejected.lock().unwrap().insert(*address);
    }

    /// La fermeture de l'ATA `owner`/`mint` échoue, les transferts passent.
    pub fn reject_close_of(&self, owner: &Pubkey, mint: &Pubkey) {
        self.rejected_closes.lock().unwrap().insert(get_associated_token_address(owner, mint));
    }

    /// Un dépôt de `amount` arrive sur l'ATA juste après le prochain transfert qui la vide.
    pub fn deposit_after_next_transfer(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) {
        self.late_deposits.lock().unwrap().insert(get_associated_token_address(owner, mint), amount);
    }

    /// Nombre de transactions exécutées avec succès.
    pub fn landed(&self) -> usize {
        self.landed.load(Ordering::SeqCst)
    }

    fn execute(&self, tx: &Transaction) -> Result<(), String> {
        tx.verify().map_err(|e| format!("signature verification failed: {e}"))?;
        let message = &tx.message;
        let keys = &message.account_keys;
        {
            let rejected = self.rejected.lock().unwrap();
            if keys.iter().any(|k| rejected.contains(k)) {
                return Err("transaction rejected by the cluster".into());
            }
        }
        let signers = &keys[..message.header.num_required_signatures as usize];
        let signed = |key: &Pubkey| signers.contains(key);

        let mut state = self.state.lock().unwrap();
        let mut next = state.clone();
        let mut token_sources = Vec::new();
        next.debit(&keys[0], TX_FEE_LAMPORTS * u64::from(message.header.num_required_signatures))?;

        for ix in &message.instructions {
            let program = keys[ix.program_id_index as usize];
            let accounts: Vec<Pubkey> = ix.accounts.iter().map(|i| keys[*i as usize]).collect();
            let data = &ix.data;

            if program == system_program::id() {
                let tag = u32::from_le_bytes(data[..4].try_into().map_err(|_| "bad system data")?);
                if tag != SYSTEM_TRANSFER {
                    return Err(format!("unsupported system instruction {tag}"));
                }
                let lamports = u64::from_le_bytes(data[4..12].try_into().map_err(|_| "bad system data")?);
                let (from, to) = (accounts[0], accounts[1]);
                if !signed(&from) {
                    return Err(format!("missing signature for {from}"));
                }
                next.debit(&from, lamports)?;
                next.credit(&to, lamports);
            } else if program == spl_token::id() {
                match data.first() {
                    Some(&TOKEN_TRANSFER) => {
                        let amount = u64::from_le_bytes(data[1..9].try_into().map_err(|_| "bad token data")?);
                        let (source, destination, owner) = (accounts[0], accounts[1], accounts[2]);
                        let from = next.tokens.get(&source).copied().ok_or("source token account missing")?;
                        let to = next.tokens.get(&destination).copied().ok_or("destination token account missing")?;
                        if from.owner != owner || !signed(&owner) {
                            return Err("token owner did not sign".into());
                        }
                        if from.mint != to.mint {
                            return Err("mint mismatch".into());
                        }
                        if from.amount < amount {
                            return Err("insufficient token balance".into());
                        }
                        next.tokens.insert(source, TokenAccount { amount: from.amount - amount, ..from });
                        token_sources.push(source);
                        let to = next.tokens[&destination];
                        next.tokens.insert(destination, TokenAccount { amount: to.amount + amount, ..to });
                    }
                    Some(&TOKEN_CLOSE_ACCOUNT) => {
                        let (account, destination, owner) = (accounts[0], accounts[1], accounts[2]);
                        let token = next.tokens.get(&account).copied().ok_or("token account missing")?;
                        if token.owner != owner || !signed(&owner) {
                            return Err("token owner did not sign".into());
                        }
                        if self.rejected_closes.lock().unwrap().contains(&account) {
                            return Err("close rejected by the cluster".into());
                        }
                        if token.amount != 0 {
                            return Err("non-native account can only be closed if its balance is zero".into());
                        }
                        let rent = next.lamports.remove(&account).unwrap_or(0);
                        next.tokens.remove(&account);
                        next.credit(&destination, rent);
                    }
                    other => return Err(format!("unsupported token instruction {other:?}")),
                }
            } else if program == spl_associated_token_account::id() {
                let (payer, ata, wallet, mint) = (accounts[0], accounts[1], accounts[2], accounts[3]);
                if ata != get_associated_token_address(&wallet, &mint) {
                    return Err("invalid associated token address".into());
                }
                if next.tokens.contains_key(&ata) {
                    if data.first() == Some(&1) {
                        continue;
                    }
                    return Err("associated token account already exists".into());
                }
                if !signed(&payer) {
                    return Err("ATA payer did not sign".into());
                }
                next.debit(&payer, TOKEN_ACCOUNT_RENT_LAMPORTS)?;
                next.credit(&ata, TOKEN_ACCOUNT_RENT_LAMPORTS);
                next.tokens.insert(ata, TokenAccount { mint, owner: wallet, amount: 0 });
            } else {
                return Err(format!("unknown program {program}"));
            }
        }

        for key in keys {
            let balance = next.lamports.get(key).copied().unwrap_or(0);
            if balance > 0 && balance < RENT_EXEMPT_MINIMUM && !next.tokens.contains_key(key) {
                return Err(format!("insufficient funds for rent on {key}"));
            }
        }
        let mut deposits = self.late_deposits.lock().unwrap();
        for source in token_sources {
            if let (Some(amount), Some(account)) = (deposits.remove(&source), next.tokens.get_mut(&source)) {
                account.amount += amount;
            }
        }
        *state = next;
        self.landed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Endpoint RPC branché sur le registre partagé.
pub struct MockEndpoint {
    url: String,
    ledger: Arc<MockLedger>,
    limited_sends: AtomicU32,
    saturated: bool,
    sends: AtomicU32,
}

impl MockEndpoint {
    pub fn healthy(url: &str, ledger: &Arc<MockLedger>) -> Arc<Self> {
        Self::build(url, ledger, 0, false)
    }

    /// Les `sends` prochains envois répondent 429, les lectures restent servies.
    pub fn rate_limited(url: &str, ledger: &Arc<MockLedger>, sends: u32) -> Arc<Self> {
        Self::build(url, ledger, sends, false)
    }

    /// Toutes les requêtes, lectures comprises, répondent 429.
    pub fn saturated(url: &str, ledger: &Arc<MockLedger>) -> Arc<Self> {
        Self::build(url, ledger, 0, true)
    }

    fn build(url: &str, ledger: &Arc<MockLedger>, limited_sends: u32, saturated: bool) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            ledger: ledger.clone(),
            limited_sends: AtomicU32::new(limited_sends),
            saturated,
            sends: AtomicU32::new(0),
        })
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    fn too_many_requests(&self) -> EngineError {
        EngineError::from_rpc_message(&self.url, "HTTP status client error (429 Too Many Requests)")
    }

    fn check_saturated(&self) -> Result<(), EngineError> {
        if self.saturated { Err(self.too_many_requests()) } else { Ok(()) }
    }
}

#[async_trait]
impl ChainClient for MockEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, EngineError> {
        self.check_saturated()?;
        Ok(self.ledger.lamports(address))
    }

    async fn get_token_account_amount(&self, token_account: &Pubkey) -> Result<Option<u64>, EngineError> {
        self.check_saturated()?;
        Ok(self.ledger.state.lock().unwrap().tokens.get(token_account).map(|a| a.amount))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, EngineError> {
        self.check_saturated()?;
        Ok(Hash::new_unique())
    }

    async fn send_and_confirm_transaction(&self, transaction: &Transaction) -> Result<Signature, EngineError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.check_saturated()?;
        let limited = self
            .limited_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if limited {
            return Err(self.too_many_requests());
        }
        self.ledger.execute(transaction).map_err(EngineError::TransactionFailed)?;
        Ok(transaction.signatures[0])
    }
}

/// Pool, file et scanner sans pauses, branchés sur `endpoints`.
pub struct Engine {
    pub pool: Arc<RpcEndpointPool>,
    pub queue: Arc<BatchTransactionQueue>,
    pub scanner: Arc<BalanceScanner>,
}

pub fn engine(endpoints: &[Arc<MockEndpoint>]) -> Engine {
    let clients = endpoints.iter().map(|e| e.clone() as Arc<dyn ChainClient>).collect();
    let pool = Arc::new(RpcEndpointPool::new(clients).unwrap());
    let queue_config = QueueConfig { batch_delay: Duration::ZERO, ..QueueConfig::default() };
    let queue = Arc::new(BatchTransactionQueue::new(pool.clone(), queue_config).unwrap());
    let scan_config = ScanConfig { per_wallet_delay: Duration::ZERO, ..ScanConfig::default() };
    let scanner = Arc::new(BalanceScanner::new(pool.clone(), scan_config));
    Engine { pool, queue, scanner }
}

/// Parent financé sur le registre.
pub fn funded_parent(ledger: &MockLedger, lamports: u64) -> Arc<KeypairSigner> {
    let parent = Arc::new(KeypairSigner::new(Keypair::new()));
    ledger.airdrop(&parent.pubkey(), lamports);
    parent
}

/// Sous-portefeuilles dérivés d'une graine fixe.
pub fn fleet(count: usize) -> Vec<DerivedKeypair> {
    derive_keypairs(&[7u8; 64], count)
}
