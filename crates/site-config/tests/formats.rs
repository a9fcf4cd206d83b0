use site_config::{
    BuildConfig, DeployContext, Redirect, Settings, SiteConfig, SiteConfigError, load, load_from,
    save_to,
};
use std::fs;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

const TOML: &str = r#"
[Settings]
  id = "this-is-a-site"
  path = "."

[build]
	command = "echo 'not a thing'"

[[redirects]]
  origin = "/other"
	force = true
  destination = "/otherpage.html"

  [context.deploy-preview]
  command = "hugo version && npm run build-preview"


[context.branch-deploy]
  command = "hugo version && npm run build-branch"

  [context.branch-deploy.environment]
    HUGO_VERSION = "0.20.5"
"#;

const JSON: &str = r#"
{
  "settings": {
    "id": "this-is-a-site",
    "path": "."
  },
  "redirects": [
    {
      "origin": "/other",
      "destination": "/otherpage.html",
      "force": true
    }
  ],
  "build": {
    "command": "echo 'not a thing'"
  },
  "context": {
    "deploy-preview": {
      "command": "hugo version && npm run build-preview"
    },
    "branch-deploy": {
      "command": "hugo version && npm run build-branch",
      "environment": {
        "HUGO_VERSION": "0.20.5"
      }
    }
  }
}
"#;

const YAML: &str = r#"
settings:
  id: "this-is-a-site"
  path: "."

redirects:
  - origin: "/other"
    destination: "/otherpage.html"
    force: true

build:
  command: "echo 'not a thing'"

context:
  deploy-preview:
    command: "hugo version && npm run build-preview"
  branch-deploy:
    command: "hugo version && npm run build-branch"
    environment:
      HUGO_VERSION: "0.20.5"
"#;

fn expected() -> SiteConfig {
    SiteConfig {
        settings: Settings {
            id: "this-is-a-site".to_string(),
            path: ".".to_string(),
        },
        redirects: vec![Redirect {
            origin: "/other".to_string(),
            destination: "/otherpage.html".to_string(),
            force: true,
        }],
        build: Some(BuildConfig {
            command: "echo 'not a thing'".to_string(),
            ..Default::default()
        }),
        context: [
            (
                "deploy-preview".to_string(),
                DeployContext::new("hugo version && npm run build-preview"),
            ),
            (
                "branch-deploy".to_string(),
                DeployContext::new("hugo version && npm run build-branch")
                    .with_env("HUGO_VERSION", "0.20.5"),
            ),
        ]
        .into_iter()
        .collect(),
    }
}

fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("site-config-")
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn missing_file_is_not_found() {
    let err = load_from(&["does-not-exist"]).unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

#[test]
fn loads_toml() {
    let file = write_temp(".toml", TOML);
    assert_eq!(load_from(&[file.path()]).unwrap(), expected());
}

#[test]
fn loads_json() {
    let file = write_temp(".json", JSON);
    assert_eq!(load_from(&[file.path()]).unwrap(), expected());
}

#[test]
fn loads_yaml() {
    let file = write_temp(".yaml", YAML);
    assert_eq!(load_from(&[file.path()]).unwrap(), expected());
}

#[test]
fn formats_decode_to_equal_records() {
    let toml = write_temp("", TOML);
    let json = write_temp("", JSON);
    let yaml = write_temp("", YAML);
    let toml = load_from(&[toml.path()]).unwrap();
    let json = load_from(&[json.path()]).unwrap();
    let yaml = load_from(&[yaml.path()]).unwrap();
    assert_eq!(toml, json);
    assert_eq!(json, yaml);
}

#[test]
fn save_writes_only_set_sections() {
    let config = SiteConfig {
        settings: Settings {
            id: "This is something".to_string(),
            path: "/dist".to_string(),
        },
        ..Default::default()
    };
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("netlify.toml");
    save_to(&config, &path).unwrap();

    let data = fs::read_to_string(&path).unwrap();
    assert!(data.starts_with("[settings]"), "{data}");
    assert!(!data.contains("redirects"));
    assert!(!data.contains("context"));
    assert_eq!(load_from(&[&path]).unwrap(), config);
}

#[test]
fn full_record_round_trips_through_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("netlify.toml");
    save_to(&expected(), &path).unwrap();
    assert_eq!(load_from(&[&path]).unwrap(), expected());
}

#[test]
fn load_searches_directory() {
    let dir = TempDir::new().unwrap();
    assert!(load(dir.path()).unwrap_err().is_not_found());

    fs::write(dir.path().join("netlify.yml"), YAML).unwrap();
    assert_eq!(load(dir.path()).unwrap(), expected());

    fs::write(dir.path().join("netlify.toml"), TOML).unwrap();
    assert!(matches!(
        load(dir.path()).unwrap_err(),
        SiteConfigError::MoreThanOneConfigPath(ref found) if found.len() == 2
    ));
}

#[test]
fn find_only_one_returns_existing_path() {
    let file = write_temp(".yaml", YAML);
    let path = site_config::find_only_one_existing_path(&[
        std::path::Path::new(""),
        file.path(),
        std::path::Path::new("does-not-exist"),
    ])
    .unwrap();
    assert_eq!(path, file.path());
}
