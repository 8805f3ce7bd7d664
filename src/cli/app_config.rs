use crate::http::ClientOptions;
use crate::report::Presentation;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// The request url,like http://www.google.com
    pub url: Option<String>,
    ///  Specify request method to use
    #[arg(
        short = 'X',
        long = "request",
        short_alias = 'm',
        value_name = "method",
        default_value = "GET"
    )]
    pub method: String,
    /// HTTP headers to send with the request.
    #[arg(short = 'H', long = "header", value_name = "Name: Value")]
    pub headers: Vec<String>,
    /// The HTTP request body data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// Timeout for the whole request in seconds, 0 for none.
    #[arg(short = 't', long = "timeout", value_name = "seconds", default_value_t = 5)]
    pub timeout_secs: u64,
    /// Suppress the response headers in the output.
    #[arg(long = "suppress-headers")]
    pub suppress_headers: bool,
    /// Suppress the response body in the output.
    #[arg(long = "suppress-body")]
    pub suppress_body: bool,
    /// Print the exchange and its timings as JSON.
    #[arg(long = "json")]
    pub json: bool,
    /// The pem path.
    #[arg(short = 'c', long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    ///  Send User-Agent <name> to server
    #[arg(short = 'A', long = "user-agent", value_name = "name")]
    pub user_agent_option: Option<String>,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            insecure: self.skip_certificate_validate,
            ca_path: self.certificate_path_option.clone(),
            user_agent: self.user_agent_option.clone(),
        }
    }

    pub fn presentation(&self) -> Presentation {
        Presentation {
            suppress_headers: self.suppress_headers,
            suppress_body: self.suppress_body,
        }
    }
}
