bitflags::bitflags! {
    /// The evaluator's configured flag set (spec §4.1). Each flag gates one
    /// consensus or standardness rule; callers pass `STANDARD` for mempool
    /// policy checks and `MANDATORY` for the minimal consensus-critical
    /// subset when deciding between a non-mandatory and mandatory reject
    /// reason (spec §4.4 step 9).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ScriptFlags: u32 {
        const P2SH                          = 1 << 0;
        const STRICTENC                     = 1 << 1;
        const DERSIG                        = 1 << 2;
        const LOW_S                         = 1 << 3;
        const NULLDUMMY                     = 1 << 4;
        const SIGPUSHONLY                   = 1 << 5;
        const MINIMALDATA                   = 1 << 6;
        const DISCOURAGE_UPGRADABLE_NOPS    = 1 << 7;
        const CLEANSTACK                    = 1 << 8;
        const CHECKLOCKTIMEVERIFY           = 1 << 9;
        const CHECKSEQUENCEVERIFY           = 1 << 10;
        const WITNESS                       = 1 << 11;
        const WITNESS_PUBKEYTYPE            = 1 << 12;
        const MINIMALIF                     = 1 << 13;
        const NULLFAIL                      = 1 << 14;
    }
}

impl ScriptFlags {
    /// The flags consensus-critical enough that every node must enforce
    /// them or risk a chain split (spec §4.4 step 9 "mandatory").
    pub const MANDATORY: ScriptFlags = ScriptFlags::P2SH;

    /// The full policy flag set applied to relay/mempool admission (spec
    /// §4.4 step 9 "STANDARD_VERIFY_FLAGS").
    pub fn standard() -> Self {
        ScriptFlags::P2SH
            | ScriptFlags::STRICTENC
            | ScriptFlags::DERSIG
            | ScriptFlags::LOW_S
            | ScriptFlags::NULLDUMMY
            | ScriptFlags::SIGPUSHONLY
            | ScriptFlags::MINIMALDATA
            | ScriptFlags::DISCOURAGE_UPGRADABLE_NOPS
            | ScriptFlags::CLEANSTACK
            | ScriptFlags::CHECKLOCKTIMEVERIFY
            | ScriptFlags::CHECKSEQUENCEVERIFY
            | ScriptFlags::WITNESS
            | ScriptFlags::WITNESS_PUBKEYTYPE
            | ScriptFlags::MINIMALIF
            | ScriptFlags::NULLFAIL
    }
}
