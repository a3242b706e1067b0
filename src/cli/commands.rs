//! CLI command implementations
//!
//! Every command loads the configuration, applies its log level, opens the
//! catalog and prints a single JSON response. `exec` answers one response
//! per request line and keeps going after failed requests.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::checksum::{self, ChecksumOptions};
use crate::collection::{Collection, CollectionDefinition, CollectionType};
use crate::config::EngineConfig;
use crate::mutation::{DocumentPipeline, OperationOptions};

use super::args::Command;
use super::catalog::Catalog;
use super::errors::{CliError, CliResult};
use super::io::{read_requests, respond, write_error, write_response};

/// Main CLI entry point
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Create {
            config,
            name,
            edge,
            definition,
        } => create(&config, &name, edge, definition.as_deref()),
        Command::Exec { config } => {
            let catalog = open_catalog(&config)?;
            exec(&catalog, io::stdin().lock(), &mut io::stdout().lock())
        }
        Command::Checksum {
            config,
            collection,
            with_revisions,
            with_data,
        } => {
            let catalog = open_catalog(&config)?;
            let collection = catalog.open_collection(&collection)?;
            let options = ChecksumOptions {
                with_revisions,
                with_data,
            };
            respond(checksum::compute(&collection, options)?.to_value())
        }
        Command::Inventory {
            config,
            include_system,
        } => respond(inventory(&open_catalog(&config)?, include_system)?),
        Command::Rename {
            config,
            collection,
            to,
        } => respond(rename(&open_catalog(&config)?, &collection, &to)?),
        Command::Properties {
            config,
            collection,
            set,
        } => {
            let catalog = open_catalog(&config)?;
            let collection = catalog.open_collection(&collection)?;
            let properties: Value = serde_json::from_str(&set)?;
            collection.update_properties(&properties, true)?;
            respond(collection.to_definition())
        }
        Command::Drop { config, collection } => {
            let catalog = open_catalog(&config)?;
            let collection = catalog.open_collection(&collection)?;
            collection.drop_collection()?;
            respond(json!({"dropped": true, "id": collection.id().to_string()}))
        }
    }
}

fn load_config(config_path: &Path) -> CliResult<EngineConfig> {
    let config = EngineConfig::load(config_path)?;
    config.apply_logging()?;
    Ok(config)
}

fn open_catalog(config_path: &Path) -> CliResult<Catalog> {
    Catalog::open(&load_config(config_path)?)
}

/// Creates the data directory layout. Fails when already initialized.
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    Catalog::initialize(&config)?;
    respond(json!({"initialized": true}))
}

/// Creates a collection from a name, a type and optional extra attributes.
pub fn create(config_path: &Path, name: &str, edge: bool, extra: Option<&str>) -> CliResult<()> {
    let catalog = open_catalog(config_path)?;
    let definition = build_definition(name, edge, extra)?;
    let collection = catalog.create(definition)?;
    respond(collection.to_definition())
}

fn build_definition(name: &str, edge: bool, extra: Option<&str>) -> CliResult<CollectionDefinition> {
    let mut attributes = match extra {
        None => Map::new(),
        Some(raw) => match serde_json::from_str(raw)? {
            Value::Object(map) => map,
            _ => return Err(CliError::bad_request("definition must be a JSON object")),
        },
    };
    let collection_type = if edge {
        CollectionType::Edge
    } else {
        CollectionType::Document
    };
    attributes.insert("name".into(), Value::from(name));
    attributes.insert("type".into(), Value::from(collection_type.code()));
    Ok(CollectionDefinition::from_value(&Value::Object(attributes))?)
}

/// Inventory entries of every collection in the catalog.
pub fn inventory(catalog: &Catalog, include_system: bool) -> CliResult<Value> {
    let entries: Vec<Value> = catalog
        .collections()?
        .iter()
        .filter_map(|c| c.inventory_entry(include_system, true, true))
        .collect();
    Ok(json!({"collections": entries}))
}

pub fn rename(catalog: &Catalog, name: &str, to: &str) -> CliResult<Value> {
    if catalog.contains(to)? {
        return Err(CliError::duplicate_name(to));
    }
    let collection = catalog.open_collection(name)?;
    collection.rename(to, true)?;
    Ok(collection.to_definition())
}

/// One line of `exec` input.
#[derive(Debug, Deserialize)]
struct Request {
    op: String,
    collection: String,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    options: OperationOptions,
}

/// Executes document requests from `input`, one response line each.
pub fn exec<R: BufRead, W: Write>(catalog: &Catalog, input: R, out: &mut W) -> CliResult<()> {
    let mut open: HashMap<String, Collection> = HashMap::new();

    for request in read_requests(input) {
        let result = request
            .and_then(|value| serde_json::from_value::<Request>(value).map_err(CliError::from))
            .and_then(|request| {
                let collection = match open.entry(request.collection.clone()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(catalog.open_collection(&request.collection)?),
                };
                execute(collection, &request)
            });

        match result {
            Ok(data) => write_response(out, data)?,
            Err(e) => write_error(out, e.code_str(), e.message())?,
        }
    }
    Ok(())
}

fn execute(collection: &Collection, request: &Request) -> CliResult<Value> {
    let pipeline = DocumentPipeline::new(collection);
    let options = &request.options;

    let result = match request.op.as_str() {
        "insert" => pipeline.insert(&request.body, options)?,
        "update" => pipeline.update(&request.body, options)?,
        "replace" => pipeline.replace(&request.body, options)?,
        "remove" => pipeline.remove(&request.body, options)?,
        "document" => {
            let key = request
                .body
                .as_str()
                .ok_or_else(|| CliError::bad_request("document expects a key string as body"))?;
            return Ok(pipeline.document(key)?);
        }
        other => return Err(CliError::bad_request(format!("unknown op '{}'", other))),
    };
    Ok(result.to_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn catalog() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new(dir.path().to_string_lossy());
        Catalog::initialize(&config).unwrap();
        let catalog = Catalog::open(&config).unwrap();
        (dir, catalog)
    }

    fn run_exec(catalog: &Catalog, lines: &[Value]) -> Vec<Value> {
        let input: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        let mut out = Vec::new();
        exec(catalog, Cursor::new(input), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_build_definition_merges_extra() {
        let definition = build_definition("links", true, Some(r#"{"waitForSync": true}"#)).unwrap();
        assert_eq!(definition.name, "links");
        assert!(definition.collection_type.is_edge());
        assert!(definition.wait_for_sync);

        let err = build_definition("links", false, Some("[1]")).unwrap_err();
        assert_eq!(err.code_str(), "COLLDB_CLI_BAD_REQUEST");
    }

    #[test]
    fn test_exec_insert_update_read() {
        let (_dir, catalog) = catalog();
        catalog
            .create(build_definition("users", false, None).unwrap())
            .unwrap();

        let responses = run_exec(
            &catalog,
            &[
                json!({"op": "insert", "collection": "users", "body": {"_key": "u1", "a": 1}}),
                json!({"op": "update", "collection": "users", "body": {"_key": "u1", "b": 2}}),
                json!({"op": "document", "collection": "users", "body": "u1"}),
            ],
        );

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["status"], "ok");
        assert_eq!(responses[0]["data"]["_id"], "users/u1");
        assert_eq!(responses[2]["data"]["a"], 1);
        assert_eq!(responses[2]["data"]["b"], 2);
        assert_eq!(responses[2]["data"]["_rev"], responses[1]["data"]["_rev"]);
    }

    #[test]
    fn test_exec_continues_after_errors() {
        let (_dir, catalog) = catalog();
        catalog
            .create(build_definition("users", false, None).unwrap())
            .unwrap();

        let responses = run_exec(
            &catalog,
            &[
                json!({"op": "remove", "collection": "users", "body": "missing"}),
                json!({"op": "insert", "collection": "nobody", "body": {}}),
                json!({"op": "explode", "collection": "users"}),
                json!({"op": "insert", "collection": "users", "body": {"_key": "ok"}}),
            ],
        );

        assert_eq!(responses[0]["code"], "COLLDB_DOCUMENT_NOT_FOUND");
        assert_eq!(responses[1]["code"], "COLLDB_CLI_UNKNOWN_COLLECTION");
        assert_eq!(responses[2]["code"], "COLLDB_CLI_BAD_REQUEST");
        assert_eq!(responses[3]["status"], "ok");
    }

    #[test]
    fn test_documents_survive_reopen() {
        let (dir, catalog) = catalog();
        catalog
            .create(build_definition("users", false, None).unwrap())
            .unwrap();
        let first = run_exec(
            &catalog,
            &[json!({"op": "insert", "collection": "users", "body": {"_key": "k", "v": 1}})],
        );
        drop(catalog);

        let config = EngineConfig::new(dir.path().to_string_lossy());
        let catalog = Catalog::open(&config).unwrap();
        let second = run_exec(
            &catalog,
            &[
                json!({"op": "document", "collection": "users", "body": "k"}),
                json!({"op": "update", "collection": "users", "body": {"_key": "k", "v": 2}}),
            ],
        );

        assert_eq!(second[0]["data"]["v"], 1);
        assert_eq!(second[0]["data"]["_rev"], first[0]["data"]["_rev"]);

        let old = crate::revision::RevisionId::parse(first[0]["data"]["_rev"].as_str().unwrap()).unwrap();
        let new = crate::revision::RevisionId::parse(second[1]["data"]["_rev"].as_str().unwrap()).unwrap();
        assert!(new > old);
    }

    #[test]
    fn test_rename_and_inventory() {
        let (_dir, catalog) = catalog();
        catalog
            .create(build_definition("a", false, None).unwrap())
            .unwrap();
        catalog
            .create(build_definition("b", true, None).unwrap())
            .unwrap();

        let err = rename(&catalog, "a", "b").unwrap_err();
        assert_eq!(err.code_str(), "COLLDB_CLI_DUPLICATE_NAME");

        let definition = rename(&catalog, "a", "c").unwrap();
        assert_eq!(definition["name"], "c");

        let inventory = inventory(&catalog, false).unwrap();
        let mut names: Vec<_> = inventory["collections"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["parameters"]["name"].as_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["b", "c"]);
    }
}
