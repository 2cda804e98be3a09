//! Turning parsed flags into a validated run configuration

use gpman::{
    CommandRequest, Config, Error, ExecutableSource, KeyOverrides, KeySet, ReaderSelection,
    Result, SessionOptions,
    config::{CreateRequest, DeleteRequest, InstallRequest, LockRequest, parse_hex},
};
use tracing::info;

use crate::Cli;

/// Version given to keys written by `--lock` without `--new-keyver`
const DEFAULT_NEW_KEY_VERSION: u8 = 1;

/// Validate the flags and resolve them into one immutable [`Config`]
///
/// CAP files are parsed here so a broken file fails the run before any
/// reader is touched.
pub(crate) fn build(cli: &Cli) -> Result<Config> {
    let overrides = KeyOverrides {
        master: cli.key.clone(),
        enc: cli.enc.clone(),
        mac: cli.mac.clone(),
        kek: cli.kek.clone(),
        key_id: cli.keyid,
        key_version: cli.keyver,
        emv: cli.emv,
        visa2: cli.visa2,
    };
    let ambiguous_lock = overrides.has_explicit_keys();
    let keys = KeySet::resolve(overrides)?;

    let cap = cli.cap.as_ref().map(read_cap).transpose()?;
    let params = cli
        .params
        .as_deref()
        .map(|p| parse_hex("install parameters", p))
        .transpose()?;

    let delete = match &cli.delete {
        Some(aids) if aids.is_empty() && !cli.default => {
            return Err(Error::Usage("--delete needs an AID or --default".into()));
        }
        Some(aids) => Some(DeleteRequest {
            aids: aids.clone(),
            default_selected: cli.default,
            with_dependents: cli.deletedeps,
        }),
        None => None,
    };

    let install = match &cli.install {
        Some(path) => {
            let source = match (path, &cap) {
                (Some(path), _) => read_cap(path)?,
                (None, Some(cap)) => cap.clone(),
                (None, None) => {
                    return Err(Error::Usage("--install needs a CAP file or --cap".into()));
                }
            };
            Some(InstallRequest {
                source,
                applet: cli.applet.clone(),
                instance: cli.instance.clone(),
                make_default: cli.default,
                reinstall: cli.reinstall,
                params: params.clone(),
            })
        }
        None => None,
    };

    let create = cli
        .create
        .clone()
        .map(|instance| {
            CreateRequest::resolve(
                instance,
                cap.as_ref(),
                cli.package.clone(),
                cli.applet.clone(),
                params.clone(),
            )
        })
        .transpose()?;

    let request = CommandRequest {
        info: cli.info,
        raw_apdus: parse_apdus(&cli.apdu)?,
        secure_apdus: parse_apdus(&cli.secure_apdu)?,
        delete,
        uninstall: cli.uninstall.as_ref().map(read_cap).transpose()?,
        load: cli.load.as_ref().map(read_cap).transpose()?,
        install,
        create,
        list: cli.list,
        lock: cli.lock.clone().map(|key| LockRequest {
            key,
            version: cli.new_keyver.unwrap_or(DEFAULT_NEW_KEY_VERSION),
            ambiguous: ambiguous_lock,
        }),
        unlock: cli.unlock,
        make_default: cli.make_default.clone(),
    };
    if request.is_empty() {
        return Err(Error::Usage("nothing to do, see --help".into()));
    }

    let options = SessionOptions {
        relaxed: cli.relax,
        continue_on_error: cli.skip_error,
        virgin: cli.virgin,
        scp_version: cli.scp.filter(|&version| version != 0),
        mode: cli.mode.unwrap_or_default(),
        domain: cli.sdaid.clone(),
    };

    let readers = match &cli.reader {
        Some(name) => ReaderSelection::Named(name.clone()),
        None => ReaderSelection::WithCard { all: cli.all },
    };

    Ok(Config {
        keys,
        request,
        options,
        readers,
    })
}

fn read_cap(path: impl AsRef<std::path::Path>) -> Result<ExecutableSource> {
    let path = path.as_ref();
    let source = ExecutableSource::from_file(path)?;
    info!(
        file = %path.display(),
        package = %source.package_aid(),
        applets = source.applet_aids().len(),
        "CAP file read"
    );
    Ok(source)
}

fn parse_apdus(apdus: &[String]) -> Result<Vec<Vec<u8>>> {
    apdus.iter().map(|apdu| parse_hex("APDU", apdu)).collect()
}
