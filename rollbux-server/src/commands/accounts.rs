use crate::auth::CredentialStore;
use anyhow::{bail, Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::{Confirm, Password};
use rollbux_core::{AccountStore, EntryReason, Posting};

pub async fn list_accounts(accounts: &AccountStore) -> Result<()> {
    let all = accounts.list_accounts().await?;

    if all.is_empty() {
        println!("No accounts found.");
        println!("Register one with: rollbux register <username>");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Username", "Balance", "Status", "Created"]);

    for account in all {
        let status = if account.frozen { "Frozen" } else { "Active" };
        table.add_row(vec![
            account.identity,
            account.balance.to_string(),
            status.to_string(),
            account.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn show_history(accounts: &AccountStore, username: &str, limit: usize) -> Result<()> {
    let entries = accounts.history(username, limit).await?;

    if entries.is_empty() {
        println!("No ledger entries for '{}'.", username);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Time", "Reason", "Change", "Balance", "Wager"]);

    for entry in entries {
        table.add_row(vec![
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.reason.to_string(),
            format!("{:+}", entry.delta),
            entry.balance_after.to_string(),
            entry
                .wager_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn register_account(
    accounts: &AccountStore,
    credentials: &CredentialStore,
    username: &str,
    starting_balance: u64,
) -> Result<()> {
    let password = Password::new()
        .with_prompt(format!("Password for '{}'", username))
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()
        .context("Failed to read password")?;

    let account = accounts.register(username, starting_balance).await?;
    credentials.set_password(&account.identity, &password).await?;

    println!("Account '{}' registered.", account.identity);
    println!("  Balance: {}", account.balance);
    Ok(())
}

/// Credit (or with `debit`, debit) an account outside of any wager.
pub async fn adjust_balance(
    accounts: &AccountStore,
    username: &str,
    amount: u64,
    debit: bool,
) -> Result<()> {
    if amount == 0 {
        bail!("Adjustment amount must be positive");
    }

    let posting = Posting::new(EntryReason::Adjustment);
    let balance = if debit {
        accounts.try_debit(username, amount, posting).await?
    } else {
        accounts.credit(username, amount, posting).await?
    };

    let sign = if debit { '-' } else { '+' };
    println!("Adjusted '{}' by {}{}", username, sign, amount);
    println!("  New balance: {}", balance);
    Ok(())
}

pub async fn unfreeze_account(accounts: &AccountStore, username: &str, force: bool) -> Result<()> {
    if !accounts.is_frozen(username).await? {
        println!("Account '{}' is not frozen.", username);
        return Ok(());
    }

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Unfreeze '{}'? Make sure any owed payout has been settled first.",
                username
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirm {
            println!("Unfreeze cancelled.");
            return Ok(());
        }
    }

    accounts.unfreeze(username).await?;
    println!("Account '{}' unfrozen.", username);
    Ok(())
}

pub async fn show_supply(accounts: &AccountStore) -> Result<()> {
    let all = accounts.list_accounts().await?;
    let frozen = all.iter().filter(|a| a.frozen).count();
    let supply = accounts.total_supply().await?;

    println!("Accounts: {} ({} frozen)", all.len(), frozen);
    println!("Total supply: {}", supply);
    Ok(())
}
