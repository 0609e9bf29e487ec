//! Built-in background modules.

use super::registry::{BackgroundModule, Connection, ModuleFunction};
use crate::server::{
    auth::Authenticator,
    bridge::MessageBridge,
    signing::AuthOrchestrator,
    wallet::{Permission, WalletState},
};
use serde_json::{Map, Value, json};
use sigbridge_core::{error::ModuleError, types::Transaction};
use std::sync::Arc;

pub const PERMISSIONS: &str = "permissions";
pub const ACTIVE_ADDRESS: &str = "active_address";
pub const ALL_ADDRESSES: &str = "all_addresses";
pub const PUBLIC_KEY: &str = "public_key";
pub const WALLET_NAMES: &str = "wallet_names";
pub const GATEWAY_CONFIG: &str = "gateway_config";
pub const SIGN: &str = "sign";

/// Every module the background serves.
pub fn background_modules<B, A>(
    wallet: Arc<WalletState>,
    orchestrator: Arc<AuthOrchestrator<B, A>>,
) -> Vec<BackgroundModule>
where
    B: MessageBridge,
    A: Authenticator,
{
    vec![
        permissions(Arc::clone(&wallet)),
        active_address(Arc::clone(&wallet)),
        all_addresses(Arc::clone(&wallet)),
        public_key(Arc::clone(&wallet)),
        wallet_names(Arc::clone(&wallet)),
        gateway_config(Arc::clone(&wallet)),
        sign(wallet, orchestrator),
    ]
}

fn permissions(wallet: Arc<WalletState>) -> BackgroundModule {
    BackgroundModule::new(
        PERMISSIONS,
        [],
        ModuleFunction::sync(move |connection, _| {
            let granted = connection
                .origin()
                .map(|origin| wallet.permissions_for(&origin))
                .unwrap_or_default();
            Ok(json!(granted))
        }),
    )
}

fn active_address(wallet: Arc<WalletState>) -> BackgroundModule {
    BackgroundModule::new(
        ACTIVE_ADDRESS,
        [Permission::AccessAddress],
        ModuleFunction::sync(move |_, _| Ok(json!(wallet.active_wallet()?.address))),
    )
}

fn all_addresses(wallet: Arc<WalletState>) -> BackgroundModule {
    BackgroundModule::new(
        ALL_ADDRESSES,
        [Permission::AccessAllAddresses],
        ModuleFunction::sync(move |_, _| {
            let addresses: Vec<_> = wallet.wallets.iter().map(|w| &w.address).collect();
            Ok(json!(addresses))
        }),
    )
}

fn public_key(wallet: Arc<WalletState>) -> BackgroundModule {
    BackgroundModule::new(
        PUBLIC_KEY,
        [Permission::AccessPublicKey],
        ModuleFunction::sync(move |_, _| Ok(json!(wallet.active_wallet()?.public_key))),
    )
}

fn wallet_names(wallet: Arc<WalletState>) -> BackgroundModule {
    BackgroundModule::new(
        WALLET_NAMES,
        [Permission::AccessAllAddresses],
        ModuleFunction::sync(move |_, _| {
            let names: Map<String, Value> = wallet
                .wallets
                .iter()
                .map(|w| (w.address.clone(), Value::String(w.name.clone())))
                .collect();
            Ok(Value::Object(names))
        }),
    )
}

fn gateway_config(wallet: Arc<WalletState>) -> BackgroundModule {
    BackgroundModule::new(
        GATEWAY_CONFIG,
        [Permission::AccessGatewayConfig],
        ModuleFunction::sync(move |_, _| Ok(json!(wallet.gateway))),
    )
}

/// `sign(transaction)`: signs with the active wallet on behalf of the
/// caller's page.
fn sign<B, A>(wallet: Arc<WalletState>, orchestrator: Arc<AuthOrchestrator<B, A>>) -> BackgroundModule
where
    B: MessageBridge,
    A: Authenticator,
{
    BackgroundModule::new(
        SIGN,
        [Permission::SignTransaction],
        ModuleFunction::asynchronous(move |connection: Connection, params| {
            let wallet = Arc::clone(&wallet);
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let transaction = transaction_param(params)?;
                let address = wallet.active_wallet()?.address.clone();
                let url = connection.url().unwrap_or_default();

                let signed = orchestrator
                    .sign_with_auth(url, &transaction, &address)
                    .await?;
                Ok(json!(signed))
            }
        }),
    )
}

fn transaction_param(params: Vec<Value>) -> Result<Transaction, ModuleError> {
    let invalid = |reason: String| ModuleError::InvalidParams {
        action: SIGN.to_string(),
        reason,
    };
    let raw = params
        .into_iter()
        .next()
        .ok_or_else(|| invalid("missing transaction".to_string()))?;
    serde_json::from_value(raw).map_err(|e| invalid(e.to_string()))
}
