use std::fs;
use std::path::{Path, PathBuf};

use amplitude_conf::Config;
use amplitude_sdk::{
    Client, DeviceInfo, Event, GroupIdentification, Identification, LocationInfo, ServerZone,
    UploadApi,
};
use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{Color, style};
use serde_json::Value;

pub mod properties;

use properties::{PropertyOps, parse_property};

/// Send identify calls and events to Amplitude.
#[derive(Parser, Debug)]
#[command(name = "amplitude", version, about)]
pub struct Cli {
    /// Project API key.
    #[arg(long, global = true, env = "AMPLITUDE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Data center of the project, US or EU.
    #[arg(long, global = true)]
    pub server_zone: Option<ServerZone>,
    /// Send requests here instead of to the server zone's endpoint.
    #[arg(long, global = true)]
    pub server_url: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Update a user's properties through the Identify API.
    Identify(IdentifyArgs),
    /// Update a group's properties through the Group Identify API.
    GroupIdentify(GroupIdentifyArgs),
    /// Send a single event.
    Track(TrackArgs),
    /// Upload events from a file with one JSON event per line.
    Upload(UploadArgs),
}

#[derive(Args, Debug, Default)]
pub struct IdentityArgs {
    #[arg(long)]
    pub user_id: Option<String>,
    #[arg(long)]
    pub device_id: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct IdentifyArgs {
    #[command(flatten)]
    pub identity: IdentityArgs,
    #[command(flatten)]
    pub properties: PropertyOps,
    #[arg(long)]
    pub language: Option<String>,
    #[arg(long)]
    pub paying: Option<String>,
    #[arg(long)]
    pub app_version: Option<String>,
    #[arg(long)]
    pub platform: Option<String>,
    #[arg(long)]
    pub os_name: Option<String>,
    #[arg(long)]
    pub os_version: Option<String>,
    #[arg(long)]
    pub device_model: Option<String>,
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
}

impl IdentifyArgs {
    pub fn into_identification(self) -> Identification {
        let user_properties = self.properties.into_user_properties();
        Identification {
            user_id: self.identity.user_id,
            device_id: self.identity.device_id,
            language: self.language,
            paying: self.paying,
            app_version: self.app_version,
            device: DeviceInfo {
                platform: self.platform,
                os_name: self.os_name,
                os_version: self.os_version,
                device_model: self.device_model,
                ..Default::default()
            },
            location: LocationInfo {
                country: self.country,
                region: self.region,
                city: self.city,
                ..Default::default()
            },
            user_properties: (!user_properties.is_empty()).then_some(user_properties),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct GroupIdentifyArgs {
    #[arg(long)]
    pub group_type: String,
    #[arg(long)]
    pub group_value: String,
    #[command(flatten)]
    pub properties: PropertyOps,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TrackApi {
    V1,
    V2,
    Batch,
}

#[derive(Args, Debug)]
pub struct TrackArgs {
    #[arg(long)]
    pub event_type: String,
    #[command(flatten)]
    pub identity: IdentityArgs,
    /// An event property, as KEY=VALUE.
    #[arg(long = "prop", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, Value)>,
    /// Event time in milliseconds since the epoch. Defaults to now.
    #[arg(long)]
    pub time: Option<i64>,
    /// Deduplication id. A random one is generated if not given.
    #[arg(long)]
    pub insert_id: Option<String>,
    #[arg(long, value_enum, default_value_t = TrackApi::V2)]
    pub api: TrackApi,
}

impl TrackArgs {
    pub fn to_event(&self, now_millis: i64) -> Event {
        let mut event = Event::new(self.event_type.clone()).with_time(self.time.unwrap_or(now_millis));
        event.user_id = self.identity.user_id.clone();
        event.device_id = self.identity.device_id.clone();
        for (key, value) in &self.properties {
            event = event.with_property(key.clone(), value.clone());
        }
        if let Some(insert_id) = &self.insert_id {
            event = event.with_insert_id(insert_id.clone());
        }
        event.with_generated_insert_id()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum UploadTarget {
    V2,
    Batch,
}

impl From<UploadTarget> for UploadApi {
    fn from(target: UploadTarget) -> Self {
        match target {
            UploadTarget::V2 => UploadApi::HttpV2,
            UploadTarget::Batch => UploadApi::Batch,
        }
    }
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Newline-delimited JSON events.
    pub file: PathBuf,
    #[arg(long, value_enum, default_value_t = UploadTarget::Batch)]
    pub api: UploadTarget,
    /// Requests in flight at once.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,
}

/// Reads one event per non-blank line.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid event on line {}", index + 1))
        })
        .collect()
}

/// Resolves the configuration, with command line flags taking precedence
/// over the environment and the config file.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("failed to load config")?;
    if let Some(api_key) = &cli.api_key {
        config.api_key = Some(api_key.clone());
    }
    if let Some(server_zone) = cli.server_zone {
        config.server_zone = Some(server_zone);
    }
    if let Some(server_url) = &cli.server_url {
        config.server_url = Some(server_url.clone());
    }
    Ok(config)
}

/// Runs the command and returns what to report on success.
pub async fn run(cli: Cli) -> Result<String> {
    let config = resolve_config(&cli)?;
    let client = config.client()?;
    tracing::debug!(server_url = client.server_url(), "created client");

    match cli.command {
        Command::Identify(args) => identify(&client, args).await,
        Command::GroupIdentify(args) => group_identify(&client, args).await,
        Command::Track(args) => track(&client, args).await,
        Command::Upload(args) => upload(&client, args).await,
    }
}

async fn identify(client: &Client, args: IdentifyArgs) -> Result<String> {
    let identification = args.into_identification();
    client
        .identify(std::slice::from_ref(&identification))
        .await
        .context("identify failed")?;

    let who = identification
        .user_id
        .or(identification.device_id)
        .unwrap_or_default();
    Ok(format!("Identified {who}"))
}

async fn group_identify(client: &Client, args: GroupIdentifyArgs) -> Result<String> {
    let group = GroupIdentification::new(args.group_type, args.group_value)
        .with_properties(args.properties.into_user_properties());
    client
        .group_identify(std::slice::from_ref(&group))
        .await
        .context("group identify failed")?;

    Ok(format!(
        "Identified group {}={}",
        group.group_type, group.group_value
    ))
}

async fn track(client: &Client, args: TrackArgs) -> Result<String> {
    let event = args.to_event(chrono::Utc::now().timestamp_millis());
    let events = std::slice::from_ref(&event);

    let response = match args.api {
        TrackApi::V1 => {
            client.track_v1(events).await.context("track failed")?;
            return Ok(format!("Tracked {}", event.event_type));
        }
        TrackApi::V2 => client.track(events).await,
        TrackApi::Batch => client.upload_batch(events).await,
    }
    .context("track failed")?;

    Ok(format!(
        "Tracked {}: {} event(s) ingested, {} bytes",
        event.event_type, response.events_ingested, response.payload_size_bytes
    ))
}

async fn upload(client: &Client, args: UploadArgs) -> Result<String> {
    let events = read_events(&args.file)?;
    if events.is_empty() {
        return Err(anyhow!("no events in '{}'", args.file.display()));
    }

    let summary = client
        .uploader(args.api.into())
        .with_concurrency(args.concurrency)
        .upload(&events)
        .await
        .context("upload failed")?;

    Ok(format!(
        "Uploaded {} event(s) in {} request(s): {} ingested, {} bytes",
        events.len(),
        summary.requests,
        summary.events_ingested,
        summary.payload_size_bytes
    ))
}

pub fn display_notice(notice: &str) {
    println!("{notice}");
}

pub fn display_error(error: &str) {
    eprintln!("{}", error_line(error));
}

fn error_line(error: &str) -> String {
    format!("{} {}", style("Error:").bold().fg(Color::Red), error)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::CommandFactory;
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_identify() {
        let cli = Cli::try_parse_from([
            "amplitude",
            "--server-zone",
            "EU",
            "identify",
            "--user-id",
            "user-1234",
            "--set",
            "plan=pro",
            "--add",
            "logins=1",
            "--country",
            "Germany",
        ])
        .unwrap();
        assert_eq!(cli.server_zone, Some(ServerZone::Eu));

        let Command::Identify(args) = cli.command else {
            panic!("expected identify");
        };
        let identification = args.into_identification();

        assert_eq!(
            identification.payload().unwrap(),
            json!({
                "user_id": "user-1234",
                "country": "Germany",
                "user_properties": {
                    "$set": {"plan": "pro"},
                    "$add": {"logins": 1},
                },
            })
        );
    }

    #[test]
    fn test_identify_without_properties() {
        let args = IdentifyArgs {
            identity: IdentityArgs {
                device_id: Some("device-1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(args.into_identification().user_properties, None);
    }

    #[test]
    fn test_parse_track() {
        let cli = Cli::try_parse_from([
            "amplitude",
            "track",
            "--event-type",
            "purchase",
            "--device-id",
            "device-1",
            "--prop",
            "amount=9.5",
            "--api",
            "v1",
        ])
        .unwrap();

        let Command::Track(args) = cli.command else {
            panic!("expected track");
        };
        assert_eq!(args.api, TrackApi::V1);

        let event = args.to_event(1_700_000_000_000);
        assert_eq!(event.event_type, "purchase");
        assert_eq!(event.device_id.as_deref(), Some("device-1"));
        assert_eq!(event.time, Some(1_700_000_000_000));
        assert_eq!(event.event_properties["amount"], json!(9.5));
        assert!(event.insert_id.is_some());
    }

    #[test]
    fn test_invalid_server_zone_is_rejected() {
        let result = Cli::try_parse_from([
            "amplitude",
            "--server-zone",
            "mars",
            "track",
            "--event-type",
            "click",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_line() {
        let line = console::strip_ansi_codes(&error_line("no API key configured")).to_string();
        assert_eq!(line, "Error: no API key configured");
    }

    #[test]
    fn test_read_events() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"event_type": "a", "user_id": "user-1"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"event_type": "b", "device_id": "device-1"}}"#).unwrap();

        let events = read_events(file.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "b");
    }

    #[test]
    fn test_read_events_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"event_type": "a", "user_id": "user-1"}}"#).unwrap();
        writeln!(file, "not json").unwrap();

        let err = read_events(file.path()).unwrap_err();
        assert_eq!(err.to_string(), "invalid event on line 2");
    }

    #[tokio::test]
    async fn test_run_upload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/2/httpapi")
                    .json_body_partial(r#"{"api_key": "cli-key"}"#);
                then.status(200).json_body(json!({
                    "code": 200,
                    "events_ingested": 2,
                    "payload_size_bytes": 120,
                    "server_upload_time": 0,
                }));
            })
            .await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"event_type": "a", "user_id": "user-1"}}"#).unwrap();
        writeln!(file, r#"{{"event_type": "b", "user_id": "user-2"}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();
        let server_url = server.base_url();

        let cli = Cli::try_parse_from([
            "amplitude",
            "--api-key",
            "cli-key",
            "--server-url",
            server_url.as_str(),
            "upload",
            path.as_str(),
            "--api",
            "v2",
        ])
        .unwrap();

        let message = run(cli).await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            message,
            "Uploaded 2 event(s) in 1 request(s): 2 ingested, 120 bytes"
        );
    }
}
