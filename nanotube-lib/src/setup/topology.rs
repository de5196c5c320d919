//! The system topology produced by interpreting the setup function.
//!
//! All cross-references are indices into the vectors owned by `Topology`;
//! nothing here points back into the IR except by value id, so the object
//! can be serialized as-is.

use crate::error::{CompileError, Result};
use crate::ir::ValueId;
use nanotube_bus::BusKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHANNEL_ATTR_SIDEBAND_BYTES: u32 = 0;
pub const CHANNEL_ATTR_SIDEBAND_SIGNALS: u32 = 1;

/// Export representation of a channel endpoint.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum ChannelExportType {
    #[default]
    None,
    SimplePacket,
    SofthubPacket,
    X3rxPacket,
}

impl ChannelExportType {
    pub fn from_raw(raw: u32) -> Option<ChannelExportType> {
        match raw {
            0 => Some(ChannelExportType::None),
            1 => Some(ChannelExportType::SimplePacket),
            2 => Some(ChannelExportType::SofthubPacket),
            3 => Some(ChannelExportType::X3rxPacket),
            _ => None,
        }
    }

    /// The bus format this export uses on the wire.
    pub fn bus_kind(self) -> Option<BusKind> {
        match self {
            ChannelExportType::None => None,
            ChannelExportType::SimplePacket => Some(BusKind::Simple),
            ChannelExportType::SofthubPacket => Some(BusKind::Softhub),
            ChannelExportType::X3rxPacket => Some(BusKind::X3rx),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum MapType {
    Illegal,
    Hash,
    LruHash,
    ArrayLe,
}

impl MapType {
    pub fn from_raw(raw: i32) -> MapType {
        match raw {
            0 => MapType::Hash,
            1 => MapType::LruHash,
            2 => MapType::ArrayLe,
            _ => MapType::Illegal,
        }
    }
}

/// Access types of `nanotube_map_op`.  `Nop` is the no-effect dummy the
/// converge pass inserts.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum MapOpKind {
    Read,
    Insert,
    Update,
    Write,
    Remove,
    Nop,
}

impl MapOpKind {
    pub fn as_raw(self) -> u64 {
        match self {
            MapOpKind::Read => 0,
            MapOpKind::Insert => 1,
            MapOpKind::Update => 2,
            MapOpKind::Write => 3,
            MapOpKind::Remove => 4,
            MapOpKind::Nop => 5,
        }
    }
}

/// One endpoint of a channel as seen from a context.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StagePort {
    pub channel_index: u32,
    pub is_read: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextInfo {
    pub index: u32,
    pub thread_id: Option<u32>,
    pub ports: Vec<StagePort>,
    // Local channel id and direction to port index.
    port_map: BTreeMap<(u32, bool), u32>,
    // Local map id to map index.
    map_map: BTreeMap<u16, u32>,
}

impl ContextInfo {
    pub fn new(index: u32) -> ContextInfo {
        ContextInfo {
            index,
            thread_id: None,
            ports: Vec::new(),
            port_map: BTreeMap::new(),
            map_map: BTreeMap::new(),
        }
    }

    pub fn add_port(&mut self, channel_index: u32, channel_id: u32, is_read: bool) -> Result<u32> {
        if self.port_map.contains_key(&(channel_id, is_read)) {
            return Err(CompileError::setup(format!(
                "channel id {channel_id} is already bound in context {}",
                self.index
            )));
        }
        let port_index = self.ports.len() as u32;
        self.ports.push(StagePort { channel_index, is_read });
        self.port_map.insert((channel_id, is_read), port_index);
        Ok(port_index)
    }

    pub fn port_index(&self, channel_id: u32, is_read: bool) -> Option<u32> {
        self.port_map.get(&(channel_id, is_read)).copied()
    }

    pub fn add_map(&mut self, user_id: u16, map_index: u32) -> Result<()> {
        if self.map_map.insert(user_id, map_index).is_some() {
            return Err(CompileError::setup(format!(
                "map id {user_id} is already bound in context {}",
                self.index
            )));
        }
        Ok(())
    }

    pub fn map_index(&self, user_id: u16) -> Option<u32> {
        self.map_map.get(&user_id).copied()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub index: u32,
    pub name: String,
    pub elem_size: u32,
    pub num_elem: u32,
    pub sideband_size: u32,
    pub sideband_signals_size: u32,
    pub writer_context: Option<u32>,
    pub writer_port: Option<u32>,
    pub reader_context: Option<u32>,
    pub reader_port: Option<u32>,
    pub write_export_type: ChannelExportType,
    pub read_export_type: ChannelExportType,
    #[serde(skip)]
    pub creator: Option<ValueId>,
}

impl ChannelInfo {
    pub fn has_writer(&self) -> bool {
        self.writer_port.is_some()
    }

    pub fn has_reader(&self) -> bool {
        self.reader_port.is_some()
    }

    pub fn set_writer(&mut self, context: u32, port: u32) -> Result<()> {
        if self.has_writer() {
            return Err(CompileError::ChannelEndpoint {
                channel: self.name.clone(),
                role: "writer",
            });
        }
        self.writer_context = Some(context);
        self.writer_port = Some(port);
        Ok(())
    }

    pub fn set_reader(&mut self, context: u32, port: u32) -> Result<()> {
        if self.has_reader() {
            return Err(CompileError::ChannelEndpoint {
                channel: self.name.clone(),
                role: "reader",
            });
        }
        self.reader_context = Some(context);
        self.reader_port = Some(port);
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub index: u32,
    pub name: String,
    pub func: String,
    pub context_index: u32,
    pub info_area_size: u32,
    #[serde(skip)]
    pub creator: Option<ValueId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapInfo {
    pub index: u32,
    pub map_id: u16,
    pub map_type: MapType,
    pub key_size: u64,
    pub value_size: u64,
    pub context_index: Option<u32>,
    #[serde(skip)]
    pub creator: Option<ValueId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelInfo {
    pub index: u32,
    pub name: String,
    pub func: String,
    pub bus_type: i32,
    pub is_capsule: bool,
    #[serde(skip)]
    pub creator: Option<ValueId>,
}

impl KernelInfo {
    /// The bus format the kernel was registered for; `None` covers the
    /// front-end's "no bus" marker (-1).
    pub fn bus_kind(&self) -> Option<BusKind> {
        BusKind::from_raw(self.bus_type)
    }
}

/// Everything the setup function declared.  Built once, immutable
/// afterwards; later passes borrow it read-only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Topology {
    pub contexts: Vec<ContextInfo>,
    pub channels: Vec<ChannelInfo>,
    pub threads: Vec<ThreadInfo>,
    pub maps: Vec<MapInfo>,
    pub kernels: Vec<KernelInfo>,
}

impl Topology {
    pub fn context(&self, index: u32) -> &ContextInfo {
        &self.contexts[index as usize]
    }

    pub fn channel(&self, index: u32) -> &ChannelInfo {
        &self.channels[index as usize]
    }

    pub fn map_info(&self, context: u32, user_id: u16) -> Option<&MapInfo> {
        let idx = self.contexts[context as usize].map_index(user_id)?;
        self.maps.get(idx as usize)
    }
}
