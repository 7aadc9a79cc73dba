use std::fmt;

/// Why a collection was started.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcCause {
    NoGc,
    /// Explicit request from the application.
    SystemGc,
    DiagnosticCommand,
    HeapDump,
    HeapInspection,
    WhiteboxYoungGc,
    WhiteboxFullGc,
    MetadataThreshold,
    MetadataClearSoftRefs,
    CodeCacheThreshold,
    Timer,
    Warmup,
    AllocationRate,
    AllocationStall,
    Proactive,
    HighUsage,
    /// Young collection run on behalf of a major collection.
    MajorYoung,
    /// Young collection promoting everything, run before a major collection.
    MajorYoungPreclean,
}

impl GcCause {
    pub const fn as_str(self) -> &'static str {
        match self {
            GcCause::NoGc => "No GC",
            GcCause::SystemGc => "System.gc()",
            GcCause::DiagnosticCommand => "Diagnostic Command",
            GcCause::HeapDump => "Heap Dump Initiated GC",
            GcCause::HeapInspection => "Heap Inspection Initiated GC",
            GcCause::WhiteboxYoungGc => "WhiteBox Initiated Young GC",
            GcCause::WhiteboxFullGc => "WhiteBox Initiated Full GC",
            GcCause::MetadataThreshold => "Metadata GC Threshold",
            GcCause::MetadataClearSoftRefs => "Metadata GC Clear Soft References",
            GcCause::CodeCacheThreshold => "CodeCache GC Threshold",
            GcCause::Timer => "Timer",
            GcCause::Warmup => "Warmup",
            GcCause::AllocationRate => "Allocation Rate",
            GcCause::AllocationStall => "Allocation Stall",
            GcCause::Proactive => "Proactive",
            GcCause::HighUsage => "High Usage",
            GcCause::MajorYoung => "Major Young",
            GcCause::MajorYoungPreclean => "Major Young Preclean",
        }
    }

    /// Requested by the application or tooling rather than by a heuristic.
    pub const fn is_user_requested(self) -> bool {
        matches!(
            self,
            GcCause::SystemGc
                | GcCause::DiagnosticCommand
                | GcCause::HeapDump
                | GcCause::HeapInspection
                | GcCause::WhiteboxYoungGc
                | GcCause::WhiteboxFullGc
        )
    }

    pub const fn should_clear_soft_references(self) -> bool {
        matches!(
            self,
            GcCause::SystemGc
                | GcCause::WhiteboxFullGc
                | GcCause::MetadataClearSoftRefs
                | GcCause::AllocationStall
        )
    }

    /// Major collections for these causes promote all young objects first.
    pub const fn should_preclean_young(self) -> bool {
        self.should_clear_soft_references()
            || matches!(self, GcCause::DiagnosticCommand | GcCause::HeapDump | GcCause::HeapInspection)
    }
}

impl Default for GcCause {
    fn default() -> Self {
        GcCause::NoGc
    }
}

impl fmt::Display for GcCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_compare_by_value() {
        assert_eq!(GcCause::Timer, GcCause::Timer);
        assert_ne!(GcCause::Timer, GcCause::Warmup);
        assert_eq!(GcCause::default(), GcCause::NoGc);
    }

    #[test]
    fn classification() {
        assert!(GcCause::SystemGc.is_user_requested());
        assert!(!GcCause::AllocationRate.is_user_requested());
        assert!(GcCause::WhiteboxYoungGc.is_user_requested());
        assert!(!GcCause::AllocationStall.is_user_requested());
        assert!(GcCause::AllocationStall.should_preclean_young());
        assert!(GcCause::HeapDump.should_preclean_young());
        assert!(!GcCause::HeapDump.should_clear_soft_references());
        assert!(!GcCause::Timer.should_preclean_young());
        assert_eq!(GcCause::HighUsage.to_string(), "High Usage");
    }
}
