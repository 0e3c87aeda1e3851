use std::sync::OnceLock;

static CONTEXT: OnceLock<Context> = OnceLock::new();

/// Process-wide target description. Holds the pointer width used for base
/// addresses, segment tags, and bounds predicates.
#[derive(Debug)]
pub struct Context {
    pointer_width: u32,
}

impl Context {
    /// Set the target pointer width. May be called more than once with the
    /// same width; changing it mid-process is a contract violation.
    pub fn initialize(pointer_width: u32) {
        let ctx = CONTEXT.get_or_init(|| Context { pointer_width });
        assert_eq!(
            ctx.pointer_width, pointer_width,
            "context already initialized with pointer width {}",
            ctx.pointer_width
        );
    }

    /// The active context; defaults to a 64-bit target.
    pub fn get() -> &'static Context {
        CONTEXT.get_or_init(|| Context { pointer_width: 64 })
    }

    pub fn pointer_width(&self) -> u32 {
        self.pointer_width
    }
}
