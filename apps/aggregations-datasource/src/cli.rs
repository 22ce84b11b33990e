use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "aggregations-datasource",
    version,
    about = "Time-series datasource backend for the aggregations API"
)]
pub struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value_t = false)]
    pub print_openapi: bool,
}
