//! CAP file parsing
//!
//! Reads a Java Card CAP archive into an [`ExecutableSource`]: the package
//! AID, the ordered applet AIDs and the load file data block sent with LOAD.

use std::{
    fs::File,
    io::{Read, Seek},
    path::Path,
};

use bytes::{BufMut, BytesMut};
use tracing::debug;
use zip::ZipArchive;

use crate::{Aid, Error, Result, globalplatform::constants::tags};

/// CAP components in the order they are concatenated for loading
const COMPONENTS: &[&str] = &[
    "Header",
    "Directory",
    "Import",
    "Applet",
    "Class",
    "Method",
    "StaticField",
    "Export",
    "ConstantPool",
    "RefLocation",
    "Descriptor",
];

/// A parsed executable load file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableSource {
    package: Aid,
    applets: Vec<Aid>,
    name: String,
    version: Option<(u8, u8)>,
    load_file: Vec<u8>,
}

impl ExecutableSource {
    /// Parse a CAP file from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::CapFile(format!("cannot open {}: {e}", path.display())))?;
        Self::from_reader(file)
    }

    /// Parse a CAP archive from any seekable reader
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut zip =
            ZipArchive::new(reader).map_err(|e| Error::CapFile(format!("invalid ZIP file: {e}")))?;

        let names: Vec<String> = zip.file_names().map(str::to_owned).collect();

        let mut components = Vec::new();
        for component in COMPONENTS {
            let suffix = format!("/{component}.cap");
            if let Some(name) = names.iter().find(|n| n.ends_with(&suffix)) {
                components.push((*component, read_entry(&mut zip, name)?));
            }
        }

        let header = components
            .iter()
            .find(|(name, _)| *name == "Header")
            .map(|(_, data)| data.as_slice())
            .ok_or_else(|| Error::CapFile("Header component missing".into()))?;
        let (header_aid, version) = parse_header(header)?;

        let manifest = match names.iter().find(|n| n.eq_ignore_ascii_case("META-INF/MANIFEST.MF")) {
            Some(name) => {
                let raw = read_entry(&mut zip, name)?;
                Some(Manifest::parse(&String::from_utf8_lossy(&raw))?)
            }
            None => None,
        };

        let package = manifest
            .as_ref()
            .and_then(|m| m.package_aid.clone())
            .unwrap_or(header_aid);
        let name = manifest
            .as_ref()
            .and_then(|m| m.package_name.clone())
            .unwrap_or_else(|| package.to_string());

        let applets = match manifest.as_ref().filter(|m| !m.applet_aids.is_empty()) {
            Some(m) => m.applet_aids.clone(),
            None => components
                .iter()
                .find(|(name, _)| *name == "Applet")
                .map(|(_, data)| parse_applet_component(data))
                .transpose()?
                .unwrap_or_default(),
        };

        let load_file = encode_load_file(components.iter().map(|(_, data)| data.as_slice()));
        debug!(
            package = %package,
            applets = applets.len(),
            size = load_file.len(),
            "parsed CAP file"
        );

        Ok(Self {
            package,
            applets,
            name,
            version,
            load_file,
        })
    }

    /// Package AID
    pub const fn package_aid(&self) -> &Aid {
        &self.package
    }

    /// Applet AIDs in declaration order
    pub fn applet_aids(&self) -> &[Aid] {
        &self.applets
    }

    /// Human readable package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package major and minor version from the header component
    pub const fn version(&self) -> Option<(u8, u8)> {
        self.version
    }

    /// Load file data block (`C4 len components`) sent with LOAD
    pub fn load_file(&self) -> &[u8] {
        &self.load_file
    }
}

fn read_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut entry = zip
        .by_name(name)
        .map_err(|e| Error::CapFile(format!("cannot read {name}: {e}")))?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}

/// Header component: tag(1) size(2) magic(4) minor(1) major(1) flags(1)
/// package minor(1) major(1) AID length(1) AID
fn parse_header(header: &[u8]) -> Result<(Aid, Option<(u8, u8)>)> {
    if header.get(3..7) != Some(&[0xDE, 0xCA, 0xFF, 0xED][..]) {
        return Err(Error::CapFile("Header component has a bad magic".into()));
    }
    let aid_len = *header
        .get(12)
        .ok_or_else(|| Error::CapFile("Header component truncated".into()))? as usize;
    let aid = header
        .get(13..13 + aid_len)
        .ok_or_else(|| Error::CapFile("Header component truncated".into()))?;
    let aid = Aid::new(aid.to_vec()).map_err(|e| Error::CapFile(e.to_string()))?;
    Ok((aid, Some((header[11], header[10]))))
}

/// Applet component: tag(1) size(2) count(1) { AID length(1) AID offset(2) }*
fn parse_applet_component(data: &[u8]) -> Result<Vec<Aid>> {
    let truncated = || Error::CapFile("Applet component truncated".into());
    let count = *data.get(3).ok_or_else(truncated)?;
    let mut rest = data.get(4..).ok_or_else(truncated)?;
    let mut applets = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let (&len, tail) = rest.split_first().ok_or_else(truncated)?;
        let aid = tail.get(..len as usize).ok_or_else(truncated)?;
        applets.push(Aid::new(aid.to_vec()).map_err(|e| Error::CapFile(e.to_string()))?);
        rest = tail.get(len as usize + 2..).ok_or_else(truncated)?;
    }

    Ok(applets)
}

/// Concatenate components and prefix them with the load file data block tag
fn encode_load_file<'a>(components: impl Iterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut body = BytesMut::new();
    for component in components {
        body.put_slice(component);
    }

    let length = encode_length(body.len());
    let mut data = BytesMut::with_capacity(1 + length.len() + body.len());
    data.put_u8(tags::LOAD_FILE_DATA_BLOCK);
    data.put_slice(&length);
    data.put_slice(&body);
    data.to_vec()
}

/// Encode a length value into BER-TLV format
pub(crate) fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        vec![length as u8]
    } else if length < 0x100 {
        vec![0x81, length as u8]
    } else if length < 0x10000 {
        vec![0x82, (length >> 8) as u8, length as u8]
    } else {
        vec![0x83, (length >> 16) as u8, (length >> 8) as u8, length as u8]
    }
}

/// The JAR manifest attributes that describe a CAP file
#[derive(Debug, Default)]
struct Manifest {
    package_aid: Option<Aid>,
    package_name: Option<String>,
    applet_aids: Vec<Aid>,
}

impl Manifest {
    fn parse(text: &str) -> Result<Self> {
        let mut manifest = Self::default();
        let mut applets: Vec<(u32, Aid)> = Vec::new();

        for (key, value) in unfold_lines(text) {
            if key == "Java-Card-Package-AID" {
                manifest.package_aid = Some(parse_manifest_aid(&value)?);
            } else if key == "Java-Card-Package-Name" {
                manifest.package_name = Some(value);
            } else if let Some(index) = key
                .strip_prefix("Java-Card-Applet-")
                .and_then(|rest| rest.strip_suffix("-AID"))
            {
                let index = index
                    .parse()
                    .map_err(|_| Error::CapFile(format!("bad manifest key {key}")))?;
                applets.push((index, parse_manifest_aid(&value)?));
            }
        }

        applets.sort_by_key(|(index, _)| *index);
        manifest.applet_aids = applets.into_iter().map(|(_, aid)| aid).collect();
        Ok(manifest)
    }
}

/// Split manifest text into `key: value` pairs, joining continuation lines
fn unfold_lines(text: &str) -> Vec<(String, String)> {
    let mut logical: Vec<String> = Vec::new();
    for line in text.lines() {
        match (line.strip_prefix(' '), logical.last_mut()) {
            (Some(continuation), Some(last)) => last.push_str(continuation),
            _ => logical.push(line.to_owned()),
        }
    }

    logical
        .iter()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .collect()
}

/// Manifest AIDs look like `0xa0:0x0:0x0:0x0:0x62:0x3:0x1`
fn parse_manifest_aid(value: &str) -> Result<Aid> {
    let bytes = value
        .split(':')
        .map(|part| {
            let digits = part.trim().trim_start_matches("0x").trim_start_matches("0X");
            u8::from_str_radix(digits, 16)
                .map_err(|_| Error::CapFile(format!("bad AID in manifest: {value}")))
        })
        .collect::<Result<Vec<u8>>>()?;
    Aid::new(bytes).map_err(|e| Error::CapFile(e.to_string()))
}
