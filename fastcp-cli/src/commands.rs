use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a raw RPC request and print the result as JSON
    Call {
        /// Method name, e.g. system.status
        method: String,

        /// Params as a JSON object
        #[arg(default_value = "{}")]
        params: String,

        /// Override the per-method deadline, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show host status as reported by the agent
    Status,
    /// List managed services and their state
    Services,
    /// Regenerate pools and the Caddyfile, then reload the proxy
    Reload,
}
