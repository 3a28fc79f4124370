use clap::{Args, Parser, Subcommand};
use mqlink_broker::PropertyValue;
use mqlink_client::{MsgProps, Options, SendableError, SubscribeOptions};

#[derive(Debug, Clone)]
pub struct Config {
    pub options: Options,
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Publish one message.
    Publish(PublishArgs),
    /// Publish a transactional message, then commit or roll it back.
    PublishTrans {
        #[command(flatten)]
        publish: PublishArgs,

        #[arg(long)]
        rollback: bool,
    },
    /// Consume messages until interrupted, acknowledging each one.
    Consume(PollArgs),
    /// Answer half-message check-backs until interrupted.
    CheckHalf {
        #[command(flatten)]
        poll: PollArgs,

        #[arg(long)]
        rollback: bool,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct PublishArgs {
    /// Message body. Valid JSON is sent as-is, anything else as a JSON string.
    #[arg(long)]
    pub body: String,

    #[arg(long)]
    pub tag: Option<String>,

    /// Message property as key=value; repeatable.
    #[arg(long = "prop", value_parser = parse_prop)]
    pub props: Vec<(String, PropertyValue)>,
}

impl PublishArgs {
    pub fn msg_props(&self) -> Option<MsgProps> {
        if self.props.is_empty() {
            return None;
        }
        Some(self.props.iter().cloned().collect())
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|_| serde_json::Value::String(self.body.clone()))
    }
}

#[derive(Args, Debug, Clone, Copy, PartialEq)]
pub struct PollArgs {
    #[arg(long, default_value_t = 16)]
    pub batch: u32,

    /// Long-poll wait in seconds; the client default applies when omitted.
    #[arg(long)]
    pub wait: Option<u32>,
}

impl PollArgs {
    pub fn subscribe_options(&self) -> Result<SubscribeOptions, SendableError> {
        Ok(SubscribeOptions::new(self.batch, self.wait)?)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    #[arg(long, env = "MQLINK_ENDPOINT", default_value = "http://127.0.0.1:7070")]
    endpoint: String,

    #[arg(long, env = "MQLINK_ACCESS_KEY")]
    access_key: String,

    #[arg(long, env = "MQLINK_ACCESS_SECRET", hide_env_values = true)]
    access_secret: String,

    #[arg(long, env = "MQLINK_INSTANCE", default_value = "")]
    instance: String,

    #[arg(long, env = "MQLINK_TOPIC")]
    topic: String,

    #[arg(long, env = "MQLINK_GROUP")]
    group: String,

    #[command(subcommand)]
    command: Command,
}

impl From<CliArgs> for Config {
    fn from(args: CliArgs) -> Self {
        Config {
            options: Options {
                endpoint: args.endpoint,
                access_key: args.access_key,
                access_secret: args.access_secret,
                topic: args.topic,
                group: args.group,
                instance: args.instance,
            },
            command: args.command,
        }
    }
}

pub fn parse_config() -> Config {
    CliArgs::parse().into()
}

fn parse_prop(raw: &str) -> Result<(String, PropertyValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty property key in '{raw}'"));
    }
    let value = match value.parse::<i64>() {
        Ok(number) => PropertyValue::Number(number),
        Err(_) => PropertyValue::Text(value.to_string()),
    };
    Ok((key.to_string(), value))
}
