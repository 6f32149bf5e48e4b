use {
    anyhow::Result,
    clap::Subcommand,
    secrecy::SecretString,
    sfdup_oauth::{
        CallbackOutcome, CallbackServer, CredentialStore, PkceFlow, callback_path, callback_port,
        load_auth_config,
    },
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in via the OAuth authorization-code flow with PKCE.
    Login {
        /// Print the authorization URL instead of opening a browser.
        #[arg(long)]
        print_url: bool,

        /// Do not wait for the redirect here; finish later with
        /// `sfdup auth complete <callback-url>`.
        #[arg(long)]
        no_wait: bool,
    },
    /// Finish a login from a pasted callback URL.
    Complete {
        /// The full redirect URL the provider sent the browser to.
        callback_url: String,
    },
    /// Show the stored credential.
    Status,
    /// Forget the stored credential.
    Logout,
}

pub async fn handle_auth(action: AuthAction) -> Result<()> {
    match action {
        AuthAction::Login {
            print_url,
            no_wait,
        } => login(print_url, no_wait).await,
        AuthAction::Complete { callback_url } => complete(&callback_url).await,
        AuthAction::Status => status(),
        AuthAction::Logout => logout(),
    }
}

async fn login(print_url: bool, no_wait: bool) -> Result<()> {
    let config = load_auth_config();
    let port = callback_port(&config);
    let path = callback_path(&config);

    let flow = PkceFlow::new(config);
    let request = flow.start()?;

    if print_url {
        println!("Open this URL to authorize:\n{}", request.url);
    } else {
        println!("Opening browser for authorization...");
        if open::that(&request.url).is_err() {
            println!("Could not open browser. Please visit:\n{}", request.url);
        }
    }

    if no_wait {
        println!("Run `sfdup auth complete <callback-url>` once the provider redirects you.");
        return Ok(());
    }

    println!("Waiting for callback on http://127.0.0.1:{port}{path} ...");
    let callback_url = CallbackServer::wait_for_callback(port, &path).await?;
    finish(&flow, &callback_url).await
}

async fn complete(callback_url: &str) -> Result<()> {
    let flow = PkceFlow::new(load_auth_config());
    finish(&flow, callback_url).await
}

async fn finish(flow: &PkceFlow, callback_url: &str) -> Result<()> {
    println!("Exchanging code for a token...");
    let mut outcome = flow.handle_callback(callback_url).await?;

    loop {
        match outcome {
            CallbackOutcome::Complete(credential) => {
                println!("Logged in to {}", credential.instance_url);
                return Ok(());
            },
            CallbackOutcome::Rejected(rejected) => {
                println!(
                    "Provider rejected the exchange ({} {}): {}",
                    rejected.status,
                    rejected.error,
                    rejected.error_description.as_deref().unwrap_or("no detail")
                );
                let Some(secret) = prompt_secret()? else {
                    anyhow::bail!("token exchange rejected; restart with `sfdup auth login`");
                };
                println!("Retrying token exchange with client secret...");
                outcome = flow.retry_exchange(&rejected, Some(&secret)).await?;
            },
        }
    }
}

fn prompt_secret() -> Result<Option<SecretString>> {
    use std::io::Write as _;

    print!("Client secret (empty to give up): ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let line = line.trim();
    Ok(if line.is_empty() {
        None
    } else {
        Some(SecretString::new(line.to_string()))
    })
}

fn status() -> Result<()> {
    let store = CredentialStore::new();
    match store.load() {
        Some(credential) => {
            let preview: String = credential.token.chars().take(6).collect();
            println!("{} [token {preview}…]", credential.instance_url);
        },
        None => println!("Not logged in."),
    }
    Ok(())
}

fn logout() -> Result<()> {
    CredentialStore::new().delete()?;
    println!("Logged out.");
    Ok(())
}
