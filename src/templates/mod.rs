// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token script templates.
//!
//! Per-token transaction sources are produced by substituting
//! `TOKEN_NAME` / `TOKEN_ADDRESS` into the generic templates below. The
//! account-creation script can be overridden with
//! `SCRIPT_PATH_CREATE_ACCOUNT` for chains whose system contracts differ.

use crate::models::TokenKind;
use crate::storage::StoredToken;

/// Default account-creation transaction. Arguments: list of raw public
/// keys (hex) and the weight applied to each of them.
const CREATE_ACCOUNT_SCRIPT: &str = r#"
transaction(publicKeys: [String], keyWeight: UInt16) {
    prepare(admin: AuthAccount) {
        let account = AuthAccount(payer: admin)
        for key in publicKeys {
            account.addPublicKey(key.decodeHex(), weight: keyWeight)
        }
    }
}
"#;

/// Vault setup for a fungible token. No arguments.
const FT_SETUP_TEMPLATE: &str = r#"
import TOKEN_NAME from TOKEN_ADDRESS

transaction {
    prepare(account: AuthAccount) {
        if account.borrow<&TOKEN_NAME.Vault>(from: TOKEN_NAME.VaultStoragePath) == nil {
            account.save(<-TOKEN_NAME.createEmptyVault(), to: TOKEN_NAME.VaultStoragePath)
            account.link<&TOKEN_NAME.Vault{TOKEN_NAME.Receiver}>(
                TOKEN_NAME.ReceiverPublicPath,
                target: TOKEN_NAME.VaultStoragePath
            )
            account.link<&TOKEN_NAME.Vault{TOKEN_NAME.Balance}>(
                TOKEN_NAME.BalancePublicPath,
                target: TOKEN_NAME.VaultStoragePath
            )
        }
    }
}
"#;

/// Fungible transfer. Arguments: amount (fixed-point string), recipient.
const FT_TRANSFER_TEMPLATE: &str = r#"
import TOKEN_NAME from TOKEN_ADDRESS

transaction(amount: UFix64, recipient: Address) {
    let sentVault: @TOKEN_NAME.Vault

    prepare(sender: AuthAccount) {
        let vault = sender.borrow<&TOKEN_NAME.Vault>(from: TOKEN_NAME.VaultStoragePath)
            ?? panic("missing TOKEN_NAME vault")
        self.sentVault <- vault.withdraw(amount: amount)
    }

    execute {
        let receiver = getAccount(recipient)
            .getCapability(TOKEN_NAME.ReceiverPublicPath)
            .borrow<&TOKEN_NAME.Vault{TOKEN_NAME.Receiver}>()
            ?? panic("missing TOKEN_NAME receiver")
        receiver.deposit(from: <-self.sentVault)
    }
}
"#;

/// Collection setup for a non-fungible token. No arguments.
const NFT_SETUP_TEMPLATE: &str = r#"
import TOKEN_NAME from TOKEN_ADDRESS

transaction {
    prepare(account: AuthAccount) {
        if account.borrow<&TOKEN_NAME.Collection>(from: TOKEN_NAME.CollectionStoragePath) == nil {
            account.save(<-TOKEN_NAME.createEmptyCollection(), to: TOKEN_NAME.CollectionStoragePath)
            account.link<&TOKEN_NAME.Collection{TOKEN_NAME.CollectionPublic}>(
                TOKEN_NAME.CollectionPublicPath,
                target: TOKEN_NAME.CollectionStoragePath
            )
        }
    }
}
"#;

/// Non-fungible transfer. Arguments: token id, recipient.
const NFT_TRANSFER_TEMPLATE: &str = r#"
import TOKEN_NAME from TOKEN_ADDRESS

transaction(id: UInt64, recipient: Address) {
    let token: @TOKEN_NAME.NFT

    prepare(sender: AuthAccount) {
        let collection = sender.borrow<&TOKEN_NAME.Collection>(from: TOKEN_NAME.CollectionStoragePath)
            ?? panic("missing TOKEN_NAME collection")
        self.token <- collection.withdraw(withdrawID: id)
    }

    execute {
        let receiver = getAccount(recipient)
            .getCapability(TOKEN_NAME.CollectionPublicPath)
            .borrow<&TOKEN_NAME.Collection{TOKEN_NAME.CollectionPublic}>()
            ?? panic("missing TOKEN_NAME collection")
        receiver.deposit(token: <-self.token)
    }
}
"#;

/// Substitute a token's name and contract address into a template.
fn render(template: &str, token: &StoredToken) -> String {
    template
        .replace("TOKEN_ADDRESS", token.address.as_str())
        .replace("TOKEN_NAME", &token.name)
}

/// The account-creation transaction source, honouring the configured
/// override path.
pub fn create_account_script(override_path: Option<&str>) -> std::io::Result<String> {
    match override_path {
        Some(path) => std::fs::read_to_string(path),
        None => Ok(CREATE_ACCOUNT_SCRIPT.to_string()),
    }
}

/// Vault/collection setup source for a token.
pub fn setup_script(token: &StoredToken) -> String {
    match token.kind {
        TokenKind::Fungible => render(FT_SETUP_TEMPLATE, token),
        TokenKind::NonFungible => render(NFT_SETUP_TEMPLATE, token),
    }
}

/// Transfer source for a token.
pub fn transfer_script(token: &StoredToken) -> String {
    match token.kind {
        TokenKind::Fungible => render(FT_TRANSFER_TEMPLATE, token),
        TokenKind::NonFungible => render(NFT_TRANSFER_TEMPLATE, token),
    }
}
