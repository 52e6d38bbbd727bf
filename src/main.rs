use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use hr_ops::config::Config;
use hr_ops::deploy::{self, SmokeTest};
use hr_ops::gateway::{self, ApiGateway, MethodRef};
use hr_ops::logs::{self, CloudWatchLogEvents, ERROR_KEYWORDS, LambdaFunctions, LogQuery};
use hr_ops::probe::{self, Endpoint};
use hr_ops::tables::{self, DynamoTables, EMPLOYEE_SHAPE, PROJECT_SHAPE};
use hr_ops::{load_sdk_config, permissions, set_up_logger};
use log::debug;
use std::path::PathBuf;
use tokio::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Cmd {
    GrantBedrock {
        function: Option<String>,
    },
    Tables {
        limit: i32,
    },
    AuditEmployee {
        keys: Vec<String>,
    },
    AuditProject {
        keys: Vec<String>,
    },
    DeployFunction {
        source: PathBuf,
        function: Option<String>,
        smoke_test: Option<SmokeTestArgs>,
    },
    Gateways,
    AuditGateway,
    RepairGateway {
        targets: Vec<MethodRef>,
        description: String,
    },
    DeployGateway {
        description: String,
    },
    StageStatus,
    Probe {
        endpoints: Vec<Endpoint>,
    },
    Logs {
        function: Option<String>,
        minutes: i64,
        limit: i32,
        tail: usize,
        keywords: Vec<String>,
    },
    Functions {
        needle: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct SmokeTestArgs {
    method: String,
    path: String,
    records_field: Option<String>,
}

#[derive(Debug)]
struct Args {
    verbose: bool,
    config_path: Option<PathBuf>,
    region: Option<String>,
    gateway_id: Option<String>,
    command: Cmd,
}

fn function_arg() -> Arg {
    Arg::new("function")
        .short('f')
        .long("function")
        .help("Deployed function name. Defaults to the configured name.")
}

fn command() -> Command {
    Command::new("hr-ops")
        .version("0.1")
        .author("Jacob Luszcz")
        .about("Deployment and diagnostics utilities for the HR Resource Optimization backend.")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Verbose mode. Outputs DEBUG and higher log messages."),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .env("HR_OPS_CONFIG")
                .value_parser(value_parser!(PathBuf))
                .help("TOML file overriding the built-in identifiers."),
        )
        .arg(
            Arg::new("region")
                .short('r')
                .long("region")
                .global(true)
                .env("AWS_REGION")
                .help("AWS region. Overrides the config file."),
        )
        .arg(
            Arg::new("gateway")
                .short('g')
                .long("gateway-id")
                .global(true)
                .help("REST API id. Overrides the config file."),
        )
        .subcommand(
            Command::new("grant-bedrock")
                .about("Replaces the Bedrock invoke policy on a function's execution role.")
                .arg(function_arg()),
        )
        .subcommand(
            Command::new("tables")
                .about("Lists DynamoDB tables and prints a small sample of each.")
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .default_value("3")
                        .value_parser(value_parser!(i32).range(1..=3))
                        .help("Items sampled per table."),
                ),
        )
        .subcommand(
            Command::new("audit-employee")
                .about("Prints the structure of employee items.")
                .arg(
                    Arg::new("key")
                        .num_args(0..)
                        .default_values(["U_003", "U_004", "U_005"])
                        .help("user_id values to fetch."),
                ),
        )
        .subcommand(
            Command::new("audit-project")
                .about("Prints the structure of project items, sampling when no ids are given.")
                .arg(Arg::new("key").num_args(0..).help("project_id values to fetch.")),
        )
        .subcommand(
            Command::new("deploy-function")
                .about("Packages a function directory, uploads it, and smoke-tests it.")
                .arg(
                    Arg::new("source")
                        .short('s')
                        .long("source")
                        .default_value("lambda_functions/employees_list")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory holding index.py."),
                )
                .arg(function_arg())
                .arg(
                    Arg::new("method")
                        .long("method")
                        .default_value("GET")
                        .help("httpMethod of the smoke-test event."),
                )
                .arg(
                    Arg::new("path")
                        .long("path")
                        .default_value("/employees")
                        .help("path of the smoke-test event."),
                )
                .arg(
                    Arg::new("records")
                        .long("records-field")
                        .help("Body field holding the returned records."),
                )
                .arg(
                    Arg::new("no-invoke")
                        .long("no-invoke")
                        .action(ArgAction::SetTrue)
                        .help("Skips the smoke-test invocation."),
                ),
        )
        .subcommand(
            Command::new("gateways").about("Lists REST APIs and their first resource paths."),
        )
        .subcommand(
            Command::new("audit-gateway").about("Lists methods that have no integration."),
        )
        .subcommand(
            Command::new("repair-gateway")
                .about("Deletes methods without integrations, then deploys the stage.")
                .arg(
                    Arg::new("target")
                        .short('t')
                        .long("target")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(MethodRef))
                        .help("Additional <resource-id>/<VERB> method to delete."),
                )
                .arg(
                    Arg::new("description")
                        .short('d')
                        .long("description")
                        .default_value("Deploy after removing methods without integrations"),
                ),
        )
        .subcommand(
            Command::new("deploy-gateway")
                .about("Creates a new deployment on the stage and confirms it took effect.")
                .arg(
                    Arg::new("description")
                        .short('d')
                        .long("description")
                        .default_value("Deploy all endpoints"),
                ),
        )
        .subcommand(
            Command::new("stage-status")
                .about("Shows the stage's deployment, route targets, and recent deployments."),
        )
        .subcommand(
            Command::new("probe")
                .about("Calls each endpoint once; 403 means the route is missing.")
                .arg(
                    Arg::new("endpoint")
                        .short('e')
                        .long("endpoint")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(Endpoint))
                        .help("<METHOD>:<path> to probe instead of the defaults."),
                ),
        )
        .subcommand(
            Command::new("logs")
                .about("Prints recent log events of a function.")
                .arg(function_arg())
                .arg(
                    Arg::new("minutes")
                        .short('m')
                        .long("minutes")
                        .default_value("5")
                        .value_parser(value_parser!(i64).range(1..))
                        .help("Look-back window."),
                )
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .default_value("100")
                        .value_parser(value_parser!(i32).range(1..=10000))
                        .help("Maximum events fetched."),
                )
                .arg(
                    Arg::new("tail")
                        .long("tail")
                        .default_value("30")
                        .value_parser(value_parser!(usize))
                        .help("Number of trailing events printed."),
                )
                .arg(
                    Arg::new("errors")
                        .long("errors")
                        .action(ArgAction::SetTrue)
                        .help("Only prints lines matching the error keywords."),
                )
                .arg(
                    Arg::new("keyword")
                        .short('k')
                        .long("keyword")
                        .action(ArgAction::Append)
                        .help("Case-insensitive keyword filter."),
                ),
        )
        .subcommand(
            Command::new("functions")
                .about("Lists functions and prints recent logs of the first matching one.")
                .arg(
                    Arg::new("needle")
                        .default_value("employeeevaluation")
                        .help("Case-insensitive name fragment."),
                ),
        )
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn parse_command(name: &str, matches: &ArgMatches) -> Cmd {
    let function = || matches.get_one::<String>("function").cloned();

    match name {
        "grant-bedrock" => Cmd::GrantBedrock {
            function: function(),
        },
        "tables" => Cmd::Tables {
            limit: *matches.get_one::<i32>("limit").expect("limit has a default"),
        },
        "audit-employee" => Cmd::AuditEmployee {
            keys: strings(matches, "key"),
        },
        "audit-project" => Cmd::AuditProject {
            keys: strings(matches, "key"),
        },
        "deploy-function" => Cmd::DeployFunction {
            source: matches
                .get_one::<PathBuf>("source")
                .cloned()
                .expect("source has a default"),
            function: function(),
            smoke_test: (!matches.get_flag("no-invoke")).then(|| SmokeTestArgs {
                method: matches
                    .get_one::<String>("method")
                    .cloned()
                    .expect("method has a default"),
                path: matches
                    .get_one::<String>("path")
                    .cloned()
                    .expect("path has a default"),
                records_field: matches.get_one::<String>("records").cloned(),
            }),
        },
        "gateways" => Cmd::Gateways,
        "audit-gateway" => Cmd::AuditGateway,
        "repair-gateway" => Cmd::RepairGateway {
            targets: matches
                .get_many::<MethodRef>("target")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            description: matches
                .get_one::<String>("description")
                .cloned()
                .expect("description has a default"),
        },
        "deploy-gateway" => Cmd::DeployGateway {
            description: matches
                .get_one::<String>("description")
                .cloned()
                .expect("description has a default"),
        },
        "stage-status" => Cmd::StageStatus,
        "probe" => Cmd::Probe {
            endpoints: matches
                .get_many::<Endpoint>("endpoint")
                .map(|values| values.cloned().collect())
                .unwrap_or_else(probe::default_endpoints),
        },
        "logs" => {
            let mut keywords = strings(matches, "keyword");
            if matches.get_flag("errors") {
                keywords.extend(ERROR_KEYWORDS.iter().map(|k| k.to_string()));
            }
            Cmd::Logs {
                function: function(),
                minutes: *matches.get_one::<i64>("minutes").expect("minutes has a default"),
                limit: *matches.get_one::<i32>("limit").expect("limit has a default"),
                tail: *matches.get_one::<usize>("tail").expect("tail has a default"),
                keywords,
            }
        }
        "functions" => Cmd::Functions {
            needle: matches
                .get_one::<String>("needle")
                .cloned()
                .expect("needle has a default"),
        },
        _ => unreachable!("clap rejects unknown subcommands"),
    }
}

fn parse_args_from<I, T>(args: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    let (name, sub_matches) = matches
        .subcommand()
        .expect("a subcommand is required");

    Ok(Args {
        verbose: matches.get_flag("verbose"),
        config_path: matches.get_one::<PathBuf>("config").cloned(),
        region: matches.get_one::<String>("region").cloned(),
        gateway_id: matches.get_one::<String>("gateway").cloned(),
        command: parse_command(name, sub_matches),
    })
}

fn parse_args() -> Args {
    parse_args_from(std::env::args_os()).unwrap_or_else(|e| e.exit())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config_path.as_deref())?;
    if let Some(region) = &args.region {
        config.region = region.clone();
    }
    if let Some(gateway_id) = &args.gateway_id {
        config.gateway_id = gateway_id.clone();
    }
    Ok(config)
}

async fn run(command: Cmd, config: &Config) -> Result<()> {
    let sdk_config = load_sdk_config(&config.region).await;

    match command {
        Cmd::GrantBedrock { function } => {
            let function = match function {
                Some(function) => function,
                None => config.function_name("evaluation")?.to_string(),
            };
            permissions::grant_bedrock_access(&sdk_config, config, &function).await
        }
        Cmd::Tables { limit } => tables::inspect_tables(&DynamoTables::new(&sdk_config), limit)
            .await
            .map(|_| ()),
        Cmd::AuditEmployee { keys } => {
            let table_name = config.table_name(EMPLOYEE_SHAPE.entity)?;
            let store = DynamoTables::new(&sdk_config);
            tables::audit_items(&store, table_name, &EMPLOYEE_SHAPE, &keys)
                .await
                .map(|_| ())
        }
        Cmd::AuditProject { keys } => {
            let table_name = config.table_name(PROJECT_SHAPE.entity)?;
            let store = DynamoTables::new(&sdk_config);
            tables::audit_items(&store, table_name, &PROJECT_SHAPE, &keys)
                .await
                .map(|_| ())
        }
        Cmd::DeployFunction {
            source,
            function,
            smoke_test,
        } => {
            let function = match function {
                Some(function) => function,
                None => config.function_name("employees_list")?.to_string(),
            };
            let smoke_test = smoke_test.map(|args| SmokeTest {
                method: args.method,
                path: args.path,
                records_field: args.records_field,
            });
            deploy::deploy_function(
                &sdk_config,
                &source,
                &function,
                smoke_test.as_ref(),
                Duration::from_secs(config.invoke_settle_secs),
            )
            .await
        }
        Cmd::Gateways => gateway::enumerate_gateways(&ApiGateway::new(&sdk_config), config)
            .await
            .map(|_| ()),
        Cmd::AuditGateway => {
            gateway::audit_gateway(&ApiGateway::new(&sdk_config), &config.gateway_id)
                .await
                .map(|_| ())
        }
        Cmd::RepairGateway {
            targets,
            description,
        } => {
            let api = ApiGateway::new(&sdk_config);
            gateway::repair_and_deploy(&api, config, &targets, &description)
                .await
                .map(|_| ())
        }
        Cmd::DeployGateway { description } => {
            gateway::redeploy_gateway(&ApiGateway::new(&sdk_config), config, &description)
                .await
                .map(|_| ())
        }
        Cmd::StageStatus => gateway::stage_status(&ApiGateway::new(&sdk_config), config)
            .await
            .map(|_| ()),
        Cmd::Probe { endpoints } => probe::probe_endpoints(config, &endpoints).await.map(|_| ()),
        Cmd::Logs {
            function,
            minutes,
            limit,
            tail,
            keywords,
        } => {
            let function = match function {
                Some(function) => function,
                None => config.function_name("evaluation")?.to_string(),
            };
            let query = LogQuery {
                log_group_name: logs::log_group_name(&function),
                window: chrono::Duration::minutes(minutes),
                limit,
                tail,
                keywords,
            };
            logs::show_logs(&CloudWatchLogEvents::new(&sdk_config), &query)
                .await
                .map(|_| ())
        }
        Cmd::Functions { needle } => logs::find_functions(
            &LambdaFunctions::new(&sdk_config),
            &CloudWatchLogEvents::new(&sdk_config),
            &needle,
        )
        .await
        .map(|_| ()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    set_up_logger(module_path!(), args.verbose)?;
    debug!("{:?}", args);

    let config = load_config(&args)?;
    debug!("{:?}", config);

    run(args.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use hr_ops::probe::ProbeMethod;

    fn parse(args: &[&str]) -> Args {
        parse_args_from(std::iter::once("main").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_command_definition() {
        command().debug_assert();
    }

    #[test]
    fn test_subcommands_need_no_arguments() {
        assert_eq!(Cmd::GrantBedrock { function: None }, parse(&["grant-bedrock"]).command);
        assert_eq!(Cmd::Tables { limit: 3 }, parse(&["tables"]).command);
        assert_eq!(
            Cmd::AuditEmployee {
                keys: vec!["U_003".to_string(), "U_004".to_string(), "U_005".to_string()]
            },
            parse(&["audit-employee"]).command
        );
        assert_eq!(Cmd::AuditProject { keys: vec![] }, parse(&["audit-project"]).command);
        assert_eq!(Cmd::Gateways, parse(&["gateways"]).command);
        assert_eq!(Cmd::StageStatus, parse(&["stage-status"]).command);
        assert_eq!(
            Cmd::Probe {
                endpoints: probe::default_endpoints()
            },
            parse(&["probe"]).command
        );
    }

    #[test]
    fn test_deploy_function_defaults() {
        assert_eq!(
            Cmd::DeployFunction {
                source: PathBuf::from("lambda_functions/employees_list"),
                function: None,
                smoke_test: Some(SmokeTestArgs {
                    method: "GET".to_string(),
                    path: "/employees".to_string(),
                    records_field: None,
                }),
            },
            parse(&["deploy-function"]).command
        );

        match parse(&["deploy-function", "--no-invoke", "-f", "ProjectsList"]).command {
            Cmd::DeployFunction {
                function,
                smoke_test,
                ..
            } => {
                assert_eq!(Some("ProjectsList".to_string()), function);
                assert_eq!(None, smoke_test);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_repair_targets() {
        let args = parse(&[
            "-g",
            "abc123",
            "repair-gateway",
            "-t",
            "3lged3/POST",
            "-t",
            "gaa5o6/post",
        ]);
        assert_eq!(Some("abc123".to_string()), args.gateway_id);
        match args.command {
            Cmd::RepairGateway { targets, .. } => assert_eq!(
                vec![MethodRef::new("3lged3", "POST"), MethodRef::new("gaa5o6", "POST")],
                targets
            ),
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(parse_args_from(["main", "repair-gateway", "-t", "bogus"]).is_err());
    }

    #[test]
    fn test_logs_error_keywords() {
        match parse(&["logs", "--errors", "-m", "10", "-v"]).command {
            Cmd::Logs {
                minutes,
                limit,
                tail,
                keywords,
                ..
            } => {
                assert_eq!(10, minutes);
                assert_eq!(100, limit);
                assert_eq!(30, tail);
                assert_eq!(ERROR_KEYWORDS.to_vec(), keywords);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(parse(&["logs", "-v"]).verbose);
    }

    #[test]
    fn test_probe_endpoints() {
        assert_eq!(
            Cmd::Probe {
                endpoints: vec![Endpoint::new(ProbeMethod::Post, "/recommendations")]
            },
            parse(&["probe", "-e", "POST:/recommendations"]).command
        );
    }

    #[test]
    fn test_overrides() {
        let args = Args {
            verbose: false,
            config_path: None,
            region: Some("eu-west-1".to_string()),
            gateway_id: None,
            command: Cmd::Gateways,
        };
        let config = load_config(&args).unwrap();
        assert_eq!("eu-west-1", config.region);
        assert_eq!("ifeniowvpb", config.gateway_id);
    }

    #[test]
    fn test_stage_status_takes_gateway_override() {
        let args = parse(&["stage-status", "-g", "xoc7x1m6p8"]);
        assert_eq!(Cmd::StageStatus, args.command);
        assert_eq!(Some("xoc7x1m6p8".to_string()), args.gateway_id);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(parse_args_from(["main"]).is_err());
    }
}
