//! Command-line client for MySQL REST Service endpoints.
//!
//! # Usage
//!
//! ```bash
//! # List the authentication apps of a service
//! mrs --url http://localhost:8080/myService auth-apps
//!
//! # Sign in and keep the token for later calls
//! export MRS_TOKEN=$(mrs --url http://localhost:8080/myService login MRS alice --password secret)
//!
//! # Read a page of a REST object
//! mrs get /sakila/actor --where '{"lastName":{"$like":"N%"}}' --order-by firstName:desc --take 5
//!
//! # Call a function, or run a procedure as a task
//! mrs call /sakila/sum --params '{"a":1,"b":2}'
//! mrs task /sakila/slowReport --procedure --task-timeout-ms 60000
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use mrs_core::{DataFilter, FieldSelection, SortOrder};
use mrs_sdk::{
    AuthenticateOptions, DeleteOptions, LoginResult, MrsService, QueryOptions, ServiceConfig,
    TaskOptions, TaskSnapshot, TaskStatus,
};
use serde_json::Value;
use std::time::Duration;

type CliResult = Result<i32, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "mrs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the service
    #[arg(long, global = true, env = "MRS_URL", default_value = "http://localhost:8080")]
    pub url: String,

    /// Path of the authentication endpoints
    #[arg(long, global = true, env = "MRS_AUTH_PATH", default_value = "/authentication")]
    pub auth_path: String,

    /// Request timeout in milliseconds
    #[arg(long, global = true, env = "MRS_TIMEOUT_MS", default_value = "8000")]
    pub timeout_ms: u64,

    /// Bearer token from an earlier login
    #[arg(long, global = true, env = "MRS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the authentication apps
    AuthApps,

    /// Show the authentication status
    Status,

    /// Sign in and print the token
    Login {
        /// Authentication app
        auth_app: String,

        /// User name
        username: String,

        #[arg(long, env = "MRS_PASSWORD", hide_env_values = true, default_value = "")]
        password: String,

        /// Vendor id of the app, looked up when omitted
        #[arg(long)]
        vendor_id: Option<String>,
    },

    /// End the session of the given token
    Logout,

    /// Read items of a REST object
    Get {
        /// Object path, for example /sakila/actor
        path: String,

        /// Filter as JSON
        #[arg(long = "where")]
        filter: Option<String>,

        /// Comma separated fields to include
        #[arg(long, conflicts_with = "exclude")]
        select: Option<String>,

        /// Comma separated fields to exclude
        #[arg(long)]
        exclude: Option<String>,

        /// Sort column as field[:asc|desc], repeatable
        #[arg(long)]
        order_by: Vec<String>,

        #[arg(long)]
        skip: Option<u64>,

        #[arg(long)]
        take: Option<u64>,

        /// Cursor as field=value, repeatable
        #[arg(long)]
        cursor: Vec<String>,

        /// Follow pages until the last one
        #[arg(long)]
        all: bool,
    },

    /// Delete items of a REST object
    Delete {
        /// Object path, for example /sakila/actor
        path: String,

        /// Filter as JSON
        #[arg(long = "where")]
        filter: String,
    },

    /// Call a function or procedure
    Call {
        /// Routine path, for example /sakila/sum
        path: String,

        /// Parameters as JSON
        #[arg(long, default_value = "{}")]
        params: String,

        /// The routine is a procedure
        #[arg(long)]
        procedure: bool,
    },

    /// Run a routine as an asynchronous task and watch it
    Task {
        /// Routine path, for example /sakila/slowReport
        path: String,

        /// Parameters as JSON
        #[arg(long, default_value = "{}")]
        params: String,

        /// The routine is a procedure
        #[arg(long)]
        procedure: bool,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "2000")]
        refresh_ms: u64,

        /// Kill the task when it runs longer than this
        #[arg(long = "task-timeout-ms")]
        task_timeout_ms: Option<u64>,
    },

    /// Print version information
    Version,
}

impl Cli {
    fn service(&self) -> MrsService {
        let mut config = ServiceConfig::new(&self.url)
            .auth_path(&self.auth_path)
            .timeout(Duration::from_millis(self.timeout_ms));
        if let Some(token) = &self.token {
            config = config.login(LoginResult {
                jwt: Some(token.clone()),
                ..Default::default()
            });
        }
        MrsService::new(config)
    }
}

pub async fn run(cli: Cli) -> CliResult {
    let service = cli.service();
    let verbose = cli.verbose;
    tracing::debug!(url = %cli.url, "using service");

    match cli.command {
        Commands::AuthApps => {
            for app in service.get_auth_apps().await? {
                let kind = if app.is_native() { "native" } else { "delegated" };
                println!("{} {} ({})", app.name.bold(), app.vendor_id.dimmed(), kind);
            }
            Ok(0)
        }
        Commands::Status => {
            let status = service.authentication_status().await;
            print_json(&serde_json::to_value(&status)?)?;
            Ok(if status.is_authorized() { 0 } else { 1 })
        }
        Commands::Login {
            auth_app,
            username,
            password,
            vendor_id,
        } => {
            let mut options = AuthenticateOptions::new(auth_app, username, password);
            if let Some(vendor_id) = vendor_id {
                options = options.vendor_id(vendor_id);
            }
            let result = service.authenticate(options).await?;
            match (&result.jwt, &result.error_message) {
                (Some(jwt), _) => {
                    println!("{}", jwt);
                    Ok(0)
                }
                (None, message) => {
                    eprintln!(
                        "{} {}",
                        "Error:".red().bold(),
                        message.as_deref().unwrap_or("The sign in failed.")
                    );
                    Ok(1)
                }
            }
        }
        Commands::Logout => {
            service.logout().await?;
            if verbose {
                println!("{}", "Signed out".green());
            }
            Ok(0)
        }
        Commands::Get {
            path,
            filter,
            select,
            exclude,
            order_by,
            skip,
            take,
            cursor,
            all,
        } => {
            let mut options = QueryOptions::new();
            if let Some(filter) = filter {
                options = options.filter(parse_filter(&filter)?);
            }
            if let Some(select) = select {
                options = options.select(FieldSelection::paths(split_list(&select)));
            }
            if let Some(exclude) = exclude {
                let fields: serde_json::Map<String, Value> = split_list(&exclude)
                    .into_iter()
                    .map(|field| (field, Value::Bool(false)))
                    .collect();
                options = options.select(FieldSelection::from_json(&Value::Object(fields))?);
            }
            for column in &order_by {
                let (field, order) = parse_order_by(column)?;
                options = options.order_by(field, order);
            }
            for entry in &cursor {
                let (field, last) = parse_assignment(entry)?;
                options = options.cursor(field, last);
            }
            if let Some(skip) = skip {
                options = options.skip(skip);
            }
            if let Some(take) = take {
                options = options.take(take);
            }

            let query = service
                .schema("")
                .object(&path, Vec::<String>::new())
                .query::<Value>(options);
            let page = if all {
                query
                    .fetch_all_with_progress(|items| {
                        if verbose {
                            eprintln!("{} {} item(s)", "Fetched".blue(), items.len());
                        }
                    })
                    .await?
            } else {
                query.fetch().await?
            };
            print_json(&serde_json::to_value(&page)?)?;
            if page.has_more() && !all {
                eprintln!("{}", "More items available".dimmed());
            }
            Ok(0)
        }
        Commands::Delete { path, filter } => {
            let result = service
                .schema("")
                .object(&path, Vec::<String>::new())
                .delete(DeleteOptions::new(parse_filter(&filter)?))
                .await?;
            println!("{} {} item(s)", "Deleted".green(), result.items_deleted);
            Ok(0)
        }
        Commands::Call {
            path,
            params,
            procedure,
        } => {
            let params: Value = serde_json::from_str(&params)?;
            let schema = service.schema("");
            if procedure {
                let response = schema.procedure(&path).call(&params).await?;
                let result_sets: Vec<Value> = response
                    .result_sets
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<_, _>>()?;
                print_json(&serde_json::json!({
                    "outParameters": response.out_parameters,
                    "resultSets": result_sets,
                }))?;
            } else {
                let response = schema.function(&path).call::<Value>(&params).await?;
                print_json(&response.result)?;
            }
            Ok(0)
        }
        Commands::Task {
            path,
            params,
            procedure,
            refresh_ms,
            task_timeout_ms,
        } => {
            let params: Value = serde_json::from_str(&params)?;
            let mut options = TaskOptions::new().refresh_rate(Duration::from_millis(refresh_ms))?;
            if let Some(timeout) = task_timeout_ms {
                options = options.timeout(Duration::from_millis(timeout));
            }

            let schema = service.schema("");
            let task = if procedure {
                schema.procedure(&path).start_task(&params).await?
            } else {
                schema.function(&path).start_task(&params).await?
            };
            if verbose {
                eprintln!("{} {}", "Started task".blue(), task.id());
            }

            let mut watcher = task.watch(options);
            while let Some(snapshot) = watcher.next().await {
                let snapshot = snapshot?;
                print_snapshot(&snapshot);
                match snapshot.status {
                    TaskStatus::Completed => {
                        print_json(snapshot.data.as_ref().unwrap_or(&Value::Null))?;
                        return Ok(0);
                    }
                    TaskStatus::Error | TaskStatus::Cancelled => return Ok(1),
                    TaskStatus::Timeout => {
                        task.kill().await?;
                        return Ok(1);
                    }
                    TaskStatus::Scheduled | TaskStatus::Running => {}
                }
            }
            Ok(1)
        }
        Commands::Version => {
            println!("mrs {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn print_json(value: &Value) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_snapshot(snapshot: &TaskSnapshot) {
    let status = match snapshot.status {
        TaskStatus::Completed => snapshot.status.as_str().green().bold(),
        TaskStatus::Error | TaskStatus::Cancelled | TaskStatus::Timeout => {
            snapshot.status.as_str().red().bold()
        }
        TaskStatus::Scheduled | TaskStatus::Running => snapshot.status.as_str().yellow(),
    };
    let progress = snapshot
        .progress
        .map(|p| format!(" [{}%]", p))
        .unwrap_or_default();
    eprintln!(
        "{}{} {}",
        status,
        progress,
        snapshot.message.as_deref().unwrap_or_default()
    );
}

fn parse_filter(source: &str) -> Result<DataFilter, Box<dyn std::error::Error>> {
    let value: Value = serde_json::from_str(source)?;
    Ok(DataFilter::from_json(value)?)
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `field` or `field:asc|desc|1|-1`.
fn parse_order_by(column: &str) -> Result<(String, SortOrder), String> {
    let (field, direction) = match column.split_once(':') {
        Some((field, direction)) => (field, direction),
        None => (column, "asc"),
    };
    let direction = match direction.parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(direction),
    };
    let order = SortOrder::from_value(&direction)
        .ok_or_else(|| format!("Invalid sort direction in \"{}\"", column))?;
    Ok((field.to_string(), order))
}

/// `field=value`, the value read as JSON when possible.
fn parse_assignment(entry: &str) -> Result<(String, Value), String> {
    let (field, value) = entry
        .split_once('=')
        .ok_or_else(|| format!("Expected field=value, got \"{}\"", entry))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
    Ok((field.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_get_arguments() {
        let cli = Cli::try_parse_from([
            "mrs",
            "--url",
            "http://h/svc",
            "get",
            "/db/t",
            "--where",
            r#"{"id":1}"#,
            "--order-by",
            "name:desc",
            "--cursor",
            "id=3",
        ])
        .unwrap();
        assert_eq!(cli.url, "http://h/svc");
        match cli.command {
            Commands::Get {
                path,
                filter,
                order_by,
                cursor,
                ..
            } => {
                assert_eq!(path, "/db/t");
                assert_eq!(filter.as_deref(), Some(r#"{"id":1}"#));
                assert_eq!(order_by, ["name:desc"]);
                assert_eq!(cursor, ["id=3"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_select_conflicts_with_exclude() {
        assert!(Cli::try_parse_from(["mrs", "get", "/t", "--select", "a", "--exclude", "b"]).is_err());
    }

    #[test]
    fn test_parse_order_by() {
        assert_eq!(parse_order_by("name").unwrap(), ("name".to_string(), SortOrder::Asc));
        assert_eq!(parse_order_by("name:DESC").unwrap(), ("name".to_string(), SortOrder::Desc));
        assert_eq!(parse_order_by("id:-1").unwrap().1, SortOrder::DescNumeric);
        assert!(parse_order_by("id:sideways").is_err());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("id=10").unwrap(), ("id".to_string(), json!(10)));
        assert_eq!(parse_assignment("name=bob").unwrap(), ("name".to_string(), json!("bob")));
        assert!(parse_assignment("id").is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c"), ["a", "b", "c"]);
    }
}
