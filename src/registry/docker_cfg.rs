use super::constants::DOCKER_CFG_HOST_REGEX;
use anyhow::{bail, ensure, Context, Result};
use base64::{
    engine::general_purpose::{STANDARD as base64_standard, STANDARD_NO_PAD as base64_standard_no_pad},
    Engine as _,
};
use fn_error_context::context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
struct DockerCfg {
    #[serde(default)]
    auths: BTreeMap<String, DockerCfgAuth>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
struct DockerCfgAuth {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    auth: String,
}

/// Reduce an images repo or registry address to the `host[:port]` authority used as the `auths`
/// key. `http://` and `https://` prefixes and any path are dropped, an explicit port is kept as is.
#[context("normalizing registry host {:?}", host)]
pub fn normalize_host(host: &str) -> Result<String> {
    let host = host.trim();
    let without_scheme = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);

    let url = Url::parse(&format!("registry://{}", without_scheme)).context("parsing as url")?;

    let hostname = url.host_str().unwrap_or_default();
    ensure!(!hostname.is_empty(), "empty host");

    Ok(match url.port() {
        Some(port) => format!("{}:{}", hostname, port),
        None => hostname.to_string(),
    })
}

/// Docker config json with a single `auths` entry for `host`. `auth` is only filled in when both
/// username and password are set, empty fields are left out.
pub fn build_docker_cfg(username: &str, password: &str, host: &str) -> Result<Vec<u8>> {
    let host = normalize_host(host)?;

    let auth = if !username.is_empty() && !password.is_empty() {
        base64_standard.encode(format!("{}:{}", username, password))
    } else {
        String::new()
    };

    let cfg = DockerCfg {
        auths: BTreeMap::from([(
            host,
            DockerCfgAuth {
                username: username.to_string(),
                password: password.to_string(),
                auth,
            },
        )]),
    };

    serde_json::to_vec(&cfg).context("serializing docker config")
}

/// Credentials stored for `host` in a docker config json. A missing host or an empty config
/// yields empty credentials.
pub fn parse_docker_cfg(docker_cfg: &[u8], host: &str) -> Result<(String, String)> {
    if docker_cfg.iter().all(u8::is_ascii_whitespace) {
        return Ok((String::new(), String::new()));
    }

    let cfg: DockerCfg = serde_json::from_slice(docker_cfg).context("parsing docker config json")?;
    let host = normalize_host(host)?;

    for (cfg_host, entry) in cfg.auths {
        match normalize_host(&cfg_host) {
            Ok(cfg_host) if cfg_host == host => {}
            _ => continue,
        }

        if entry.auth.is_empty() {
            return Ok((entry.username, entry.password));
        }

        return decode_auth(&entry.auth).context(format!("decoding auth for host {}", cfg_host));
    }

    Ok((String::new(), String::new()))
}

fn decode_auth(auth: &str) -> Result<(String, String)> {
    let decoded = match base64_standard.decode(auth) {
        Ok(decoded) => decoded,
        Err(_) => base64_standard_no_pad.decode(auth).context("auth is not valid base64")?,
    };

    let decoded = String::from_utf8(decoded).context("auth is not valid utf-8")?;

    match decoded.split_once(':') {
        Some((username, password)) => Ok((username.to_string(), password.to_string())),
        None => bail!("auth is missing the ':' separator"),
    }
}

/// Checks a user supplied base64 docker config: every `auths` host must look like a registry host
/// and one of them must be exactly `expected_repo_host`.
pub fn validate_registry_docker_cfg(docker_cfg_base64: &str, expected_repo_host: &str) -> Result<()> {
    let decoded = base64_standard
        .decode(docker_cfg_base64.trim())
        .context("unable to decode registryDockerCfg from base64")?;

    let cfg: DockerCfg = serde_json::from_slice(&decoded).context("unable to parse registryDockerCfg as docker config json")?;

    for host in cfg.auths.keys() {
        ensure!(
            DOCKER_CFG_HOST_REGEX.is_match(host),
            "invalid registryDockerCfg. Your auths host \"{}\" should be similar to \"your.private.registry.example.com\"",
            host
        );
    }

    ensure!(
        cfg.auths.contains_key(expected_repo_host),
        "invalid registryDockerCfg. Auths host \"{}\" not found, available hosts: {:?}",
        expected_repo_host,
        cfg.auths.keys().collect::<Vec<_>>()
    );

    Ok(())
}
