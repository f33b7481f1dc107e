use std::fs;

use deltagraph_core::{Error, Repository, RepositoryConfig, Schema, Strategies};
use deltagraph_test_support::{car_config, car_schema, CAR};

const FLEET: &str = r#"
app_name = "fleet"

[types.Car]
dims = ["oid", "xvel", "yvel", "xpos", "ypos"]
chain = ["Vehicle"]

[types.Vehicle]
dims = ["oid"]
"#;

#[test]
fn repository_opens_from_a_file() {
    let path = std::env::temp_dir().join(format!("deltagraph-config-{}.toml", std::process::id()));
    fs::write(&path, FLEET).unwrap();
    let config = RepositoryConfig::load(&path);
    fs::remove_file(&path).unwrap();

    let config = config.unwrap();
    let repo = Repository::new(config, Strategies::new()).unwrap();
    assert_eq!(repo.app_name(), "fleet");
    let schema = repo.manager().schema();
    assert_eq!(schema.type_names().collect::<Vec<_>>(), vec![CAR, "Vehicle"]);
    assert_eq!(
        schema.type_chain(CAR).unwrap(),
        &["Car".to_string(), "Vehicle".to_string()]
    );
    assert_eq!(schema.type_chain("Vehicle").unwrap(), &["Vehicle".to_string()]);
}

#[test]
fn built_config_matches_the_fixture_schema() {
    assert_eq!(car_config("server").schema().unwrap(), car_schema());
}

#[test]
fn type_info_round_trips_through_json() {
    let schema = RepositoryConfig::from_toml_str(FLEET).unwrap().schema().unwrap();
    let info = schema.to_type_info();
    assert_eq!(Schema::from_type_info(&info).unwrap(), schema);
}

#[test]
fn invalid_configs_are_rejected() {
    let empty_name = RepositoryConfig::from_toml_str("app_name = \"\"\n").unwrap();
    assert!(matches!(
        Repository::new(empty_name, Strategies::new()),
        Err(Error::Config(_))
    ));

    let empty_dim = "app_name = \"x\"\n[types.Car]\ndims = [\"oid\", \"\"]\n";
    let config = RepositoryConfig::from_toml_str(empty_dim).unwrap();
    assert!(matches!(config.schema(), Err(Error::Config(_))));

    let err = RepositoryConfig::from_toml_str("app_name = \"x\"\n[types.Car]\nlayout = 1\n")
        .unwrap_err();
    assert!(err.to_string().contains("line 3"), "{err}");
}
