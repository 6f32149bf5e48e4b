use {
    anyhow::Result,
    clap::Subcommand,
    sfdup_api::{ApiClient, Customer, MatchStatus},
    sfdup_oauth::CredentialStore,
};

#[derive(Subcommand)]
pub enum MatchAction {
    /// List pending duplicate matches.
    List,
    /// Mark a match as merged.
    Merge { id: String },
    /// Mark a match as ignored.
    Ignore { id: String },
}

pub async fn handle_matches(action: MatchAction) -> Result<()> {
    match action {
        MatchAction::List => list().await,
        MatchAction::Merge { id } => resolve(&id, MatchStatus::Merged).await,
        MatchAction::Ignore { id } => resolve(&id, MatchStatus::Ignored).await,
    }
}

fn client() -> Result<ApiClient> {
    let credential = CredentialStore::new()
        .load()
        .ok_or_else(|| anyhow::anyhow!("not logged in; run `sfdup auth login` first"))?;
    Ok(ApiClient::new(&credential.instance_url, &credential.token))
}

async fn list() -> Result<()> {
    let api = client()?;
    let items = api.list_pending().await?;
    if items.is_empty() {
        println!("No pending duplicate matches.");
        return Ok(());
    }

    for item in items {
        let a = describe(item.customer_a.as_ref(), &item.customer_a_id);
        let b = describe(item.customer_b.as_ref(), &item.customer_b_id);
        println!("{}  score {:.2}  {a} <> {b}", item.id, item.score);
    }
    Ok(())
}

fn describe(customer: Option<&Customer>, id: &str) -> String {
    match customer {
        Some(customer) => {
            let name = [customer.first_name.as_deref(), customer.last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            let email = customer.email.as_deref().unwrap_or("no email");
            if name.is_empty() {
                format!("{id} ({email})")
            } else {
                format!("{name} ({email})")
            }
        },
        None => id.to_string(),
    }
}

async fn resolve(id: &str, status: MatchStatus) -> Result<()> {
    let api = client()?;
    api.resolve(id, status).await?;
    println!("Match {id} marked {}.", status.as_str());
    Ok(())
}
