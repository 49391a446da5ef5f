use crate::{config::Config, demo};
use bindery_rpc::DispatchTable;
use clap::{Args, Parser};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "bindery", version, about = "Bind declared rpc services to dispatch tables")]
pub enum Cli {
    /// Print the dispatch table of the update service.
    Describe(DescribeArgs),
    /// Serve the update service in process and call every method once.
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct DescribeArgs {
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DemoArgs {
    #[arg(long, default_value = "message")]
    pub content: String,
}

pub async fn run_cli(config: Config) -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli {
        Cli::Describe(args) => {
            let table = demo::bind(&config)?;
            println!("{}", describe(&table, args.json)?);
        }
        Cli::Demo(args) => {
            let report = demo::run(&config, &args.content).await?;
            println!("{report:#?}");
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ServiceView<'a> {
    service: &'a str,
    methods: Vec<MethodView<'a>>,
}

#[derive(Serialize)]
struct MethodView<'a> {
    path: &'a str,
    kind: String,
    request_codec: String,
    response_codec: String,
    request_type: &'static str,
    response_type: &'static str,
}

pub fn describe(table: &DispatchTable, json: bool) -> anyhow::Result<String> {
    let view = ServiceView {
        service: table.service_name(),
        methods: table
            .iter()
            .map(|binding| {
                let method = binding.descriptor();
                MethodView {
                    path: method.full_name(),
                    kind: method.method_type().to_string(),
                    request_codec: method.request_codec().to_string(),
                    response_codec: method.response_codec().to_string(),
                    request_type: method.request_marshaller().message_type(),
                    response_type: method.response_marshaller().message_type(),
                }
            })
            .collect(),
    };

    if json {
        return Ok(serde_json::to_string_pretty(&view)?);
    }

    let mut out = view.service.to_string();
    for method in &view.methods {
        out += &format!(
            "\n  /{}  {}  {} -> {}",
            method.path, method.kind, method.request_codec, method.response_codec
        );
    }
    Ok(out)
}
