//! Well-known AuxData tables.
//!
//! Each schema fixes a table name and the Rust type stored under it, so
//! tools that agree on a schema agree on the signature too. Use with
//! [`AuxDataContainer::insert_typed`](crate::core::aux_data::AuxDataContainer::insert_typed)
//! and `get_typed`.

use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::core::aux_data::AuxType;
use crate::core::offset::Offset;

/// A named AuxData table with a fixed value type.
pub trait AuxDataSchema {
    const NAME: &'static str;
    type Value: AuxType;
}

macro_rules! aux_schema {
    ($(#[$doc:meta])* $schema:ident, $name:literal, $value:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $schema;

        impl AuxDataSchema for $schema {
            const NAME: &'static str = $name;
            type Value = $value;
        }
    };
}

aux_schema!(
    /// Function identifier to the blocks making up the function.
    FunctionBlocks,
    "functionBlocks",
    BTreeMap<Uuid, BTreeSet<Uuid>>
);

aux_schema!(
    /// Function identifier to its entry blocks.
    FunctionEntries,
    "functionEntries",
    BTreeMap<Uuid, BTreeSet<Uuid>>
);

aux_schema!(
    /// Function identifier to the symbol naming it.
    FunctionNames,
    "functionNames",
    BTreeMap<Uuid, Uuid>
);

aux_schema!(
    /// Data block to a type description.
    Types,
    "types",
    BTreeMap<Uuid, String>
);

aux_schema!(
    /// Block or data object to its required alignment.
    Alignment,
    "alignment",
    BTreeMap<Uuid, u64>
);

aux_schema!(
    /// Free-form comments at byte positions.
    Comments,
    "comments",
    BTreeMap<Offset, String>
);

aux_schema!(
    /// Symbol to the symbol it forwards to.
    SymbolForwarding,
    "symbolForwarding",
    BTreeMap<Uuid, Uuid>
);

aux_schema!(
    /// Padding length at byte positions.
    Padding,
    "padding",
    BTreeMap<Offset, u64>
);

aux_schema!(
    /// Code block run as the ELF dynamic initializer.
    ElfDynamicInit,
    "elfDynamicInit",
    Uuid
);

aux_schema!(
    /// Code block run as the ELF dynamic finalizer.
    ElfDynamicFini,
    "elfDynamicFini",
    Uuid
);

aux_schema!(
    /// Execution counts at instruction positions. Provisional.
    Profile,
    "profile",
    BTreeMap<Offset, u64>
);

/// ELF symbol version identifier.
pub type SymbolVersionId = u16;

/// Version definitions (`.gnu.version_d`): the version string followed by
/// its predecessors, and the verdef flags.
pub type ElfSymVerDefs = BTreeMap<SymbolVersionId, (Vec<String>, u16)>;

/// Library name to the versions it is needed at (`.gnu.version_r`).
pub type ElfSymVerNeeded = BTreeMap<String, BTreeMap<SymbolVersionId, String>>;

/// Symbol to its version identifier and hidden attribute.
pub type ElfSymbolVersionsEntries = BTreeMap<Uuid, (SymbolVersionId, bool)>;

aux_schema!(
    /// ELF symbol version definitions, requirements and assignments.
    /// Provisional.
    ElfSymbolVersions,
    "elfSymbolVersions",
    (ElfSymVerDefs, ElfSymVerNeeded, ElfSymbolVersionsEntries)
);

#[cfg(test)]
mod tests {
    use super::*;

    fn signature_of<S: AuxDataSchema>() -> String {
        S::Value::signature().to_string()
    }

    #[test]
    fn test_schema_signatures() {
        assert_eq!(signature_of::<FunctionBlocks>(), "mapping<UUID,set<UUID>>");
        assert_eq!(signature_of::<FunctionNames>(), "mapping<UUID,UUID>");
        assert_eq!(signature_of::<Comments>(), "mapping<Offset,string>");
        assert_eq!(signature_of::<Padding>(), "mapping<Offset,uint64>");
        assert_eq!(signature_of::<ElfDynamicInit>(), "UUID");
        assert_eq!(Profile::NAME, "profile");
        assert_eq!(
            signature_of::<ElfSymbolVersions>(),
            "tuple<mapping<uint16,tuple<sequence<string>,uint16>>,\
             mapping<string,mapping<uint16,string>>,\
             mapping<UUID,tuple<uint16,bool>>>"
        );
    }
}
