//! Compile-time configuration shared by the compiler and the VM.

/// Highest register index a function may use. The instruction encoding
/// reserves 8 bits per register operand.
pub const MAX_REGISTERS: usize = 255;

/// Maximum number of upvalues a single function may capture.
pub const MAX_UPVALUES: usize = 255;

/// Ceiling on per-proto constant pool sizes.
pub const MAX_CONSTANTS: usize = 0xFFFF_FFFF;

/// Ceiling on nested protos per function.
pub const MAX_NESTED_PROTOS: usize = 0xFFFF_FFFF;

/// Sentinel for "as many as are available" argument and result counts.
pub const MULTRET: u8 = 255;

/// Integer keys this far past the end of a table's array part still grow the
/// array instead of spilling to the hash part.
pub const TABLE_ARRAY_GROWTH_LIMIT: usize = 64;

/// Allocation threshold (bytes) below which the collector never starts.
pub const GC_INITIAL_THRESHOLD: usize = 4096;

/// Bytes of debt retired per unit of collector work.
pub const GC_BYTES_PER_WORK_UNIT: usize = 1024;

/// Work units a single incremental `gc_step` may perform.
pub const GC_WORK_BUDGET: usize = 100;

/// Floor for the adaptive free-object pool limit.
pub const GC_MINIMUM_POOL_LIMIT: usize = 256;

/// Cap for the adaptive free-object pool limit.
pub const GC_MAXIMUM_POOL_LIMIT: usize = 4096;
