// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::Reg;

/// The register layout of one IP block: symbolic names to byte offsets
/// within a window of `window` bytes.
///
/// Declaration order is preserved and determines the [`Reg`] handle each
/// name resolves to.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegisterMap {
    pub window: u32,
    #[serde(default)]
    pub map: IndexMap<String, RegDesc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegDesc {
    pub offset: u32,
    #[serde(default)]
    pub reset: u32,
}

/// The register file could not be established, or a configuration names a
/// register that does not exist in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MappingFailure {
    UnknownRegister(String),
    DuplicateName(String),
    DuplicateOffset { name: String, offset: u32 },
    Misaligned { name: String, offset: u32 },
    OutOfWindow { name: String, offset: u32 },
    /// A field mask that selects no bits.
    EmptyMask(String),
    /// More registers than a [`Reg`] handle can address.
    TooManyRegisters,
}

impl core::fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownRegister(name) => {
                write!(f, "register {name:?} is not in the register map")
            }
            Self::DuplicateName(name) => {
                write!(f, "register {name:?} is defined twice")
            }
            Self::DuplicateOffset { name, offset } => write!(
                f,
                "register {name:?} reuses offset {offset:#x} of an earlier register"
            ),
            Self::Misaligned { name, offset } => write!(
                f,
                "register {name:?} at offset {offset:#x} is not 4-byte aligned"
            ),
            Self::OutOfWindow { name, offset } => write!(
                f,
                "register {name:?} at offset {offset:#x} lies outside the mapped window"
            ),
            Self::EmptyMask(what) => write!(f, "{what}: mask selects no bits"),
            Self::TooManyRegisters => write!(f, "too many registers"),
        }
    }
}

impl std::error::Error for MappingFailure {}

impl RegisterMap {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            map: IndexMap::new(),
        }
    }

    /// Adds a register, checking it against the ones already present.
    pub fn insert(
        &mut self,
        name: &str,
        offset: u32,
        reset: u32,
    ) -> Result<Reg, MappingFailure> {
        if self.map.contains_key(name) {
            return Err(MappingFailure::DuplicateName(name.to_string()));
        }
        self.check_one(name, offset)?;
        if self.map.values().any(|d| d.offset == offset) {
            return Err(MappingFailure::DuplicateOffset {
                name: name.to_string(),
                offset,
            });
        }
        let (ndx, _) =
            self.map.insert_full(name.to_string(), RegDesc { offset, reset });
        reg_for(ndx)
    }

    /// Builder-style [`RegisterMap::insert`] for fixed layouts.
    pub fn with(mut self, name: &str, offset: u32) -> Result<Self, MappingFailure> {
        self.insert(name, offset, 0)?;
        Ok(self)
    }

    /// Checks a map that came from a configuration file.
    pub fn validate(&self) -> Result<(), MappingFailure> {
        if self.map.len() > usize::from(u16::MAX) {
            return Err(MappingFailure::TooManyRegisters);
        }
        for (i, (name, desc)) in self.map.iter().enumerate() {
            self.check_one(name, desc.offset)?;
            if self.map.values().take(i).any(|d| d.offset == desc.offset) {
                return Err(MappingFailure::DuplicateOffset {
                    name: name.clone(),
                    offset: desc.offset,
                });
            }
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Reg> {
        let ndx = self.map.get_index_of(name)?;
        reg_for(ndx).ok()
    }

    pub fn name(&self, reg: Reg) -> Option<&str> {
        self.map.get_index(reg.index()).map(|(n, _)| n.as_str())
    }

    pub fn desc(&self, reg: Reg) -> Option<&RegDesc> {
        self.map.get_index(reg.index()).map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn check_one(&self, name: &str, offset: u32) -> Result<(), MappingFailure> {
        if offset % 4 != 0 {
            return Err(MappingFailure::Misaligned {
                name: name.to_string(),
                offset,
            });
        }
        if offset.checked_add(4).map_or(true, |end| end > self.window) {
            return Err(MappingFailure::OutOfWindow {
                name: name.to_string(),
                offset,
            });
        }
        Ok(())
    }
}

fn reg_for(ndx: usize) -> Result<Reg, MappingFailure> {
    u16::try_from(ndx)
        .map(Reg)
        .map_err(|_| MappingFailure::TooManyRegisters)
}
