use crate::api;
use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::Result;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server { port, dsn } => {
            // Fail early on malformed connection strings
            let dsn = Url::parse(&dsn)?;

            api::serve(port, dsn.to_string(), globals).await?;
        }
    }

    Ok(())
}
