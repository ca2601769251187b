//! Trap frames, trap numbers and segment selectors.
//!
//! Frames are exchanged with user memory as sequences of little-endian
//! 32-bit words, in declaration order.

use core::fmt;

// Processor exceptions.
pub const T_DIVIDE: u32 = 0;
pub const T_DEBUG: u32 = 1;
pub const T_NMI: u32 = 2;
pub const T_BRKPT: u32 = 3;
pub const T_OFLOW: u32 = 4;
pub const T_BOUND: u32 = 5;
pub const T_ILLOP: u32 = 6;
pub const T_DEVICE: u32 = 7;
pub const T_DBLFLT: u32 = 8;
pub const T_TSS: u32 = 10;
pub const T_SEGNP: u32 = 11;
pub const T_STACK: u32 = 12;
pub const T_GPFLT: u32 = 13;
pub const T_PGFLT: u32 = 14;
pub const T_FPERR: u32 = 16;
pub const T_ALIGN: u32 = 17;
pub const T_MCHK: u32 = 18;
pub const T_SIMDERR: u32 = 19;

/// Hardware IRQ `n` arrives as trap `IRQ_OFFSET + n`.
pub const IRQ_OFFSET: u32 = 32;
pub const IRQ_TIMER: u32 = 0;
pub const IRQ_KBD: u32 = 1;
pub const IRQ_SERIAL: u32 = 4;
pub const IRQ_SPURIOUS: u32 = 7;
pub const IRQ_NIC: u32 = 11;
pub const IRQ_IDE: u32 = 14;
pub const IRQ_ERROR: u32 = 19;

/// System call gate.
pub const T_SYSCALL: u32 = 48;
/// Inter-processor interrupt asking the target CPU to reschedule.
pub const T_RESCHEDULE: u32 = 50;

// Segment selectors.
pub const GD_KT: u32 = 0x08;
pub const GD_KD: u32 = 0x10;
pub const GD_UT: u32 = 0x18;
pub const GD_UD: u32 = 0x20;
/// Requested privilege level for user selectors.
pub const DPL_USER: u32 = 3;

// EFLAGS bits.
pub const FL_IF: u32 = 0x0000_0200;
pub const FL_IOPL_MASK: u32 = 0x0000_3000;
pub const FL_IOPL_3: u32 = 0x0000_3000;

// Page-fault error code bits.
/// Fault on a present page (protection violation).
pub const FEC_PR: u32 = 0x1;
/// Fault caused by a write.
pub const FEC_WR: u32 = 0x2;
/// Fault raised from user mode.
pub const FEC_U: u32 = 0x4;

/// General-purpose registers in the order a `pusha` leaves them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Ignored on restore.
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

impl PushRegs {
    pub const WORDS: usize = 8;

    fn to_words(self) -> [u32; Self::WORDS] {
        [
            self.edi, self.esi, self.ebp, self.oesp, self.ebx, self.edx, self.ecx, self.eax,
        ]
    }

    fn from_words(w: &[u32]) -> Self {
        Self {
            edi: w[0],
            esi: w[1],
            ebp: w[2],
            oesp: w[3],
            ebx: w[4],
            edx: w[5],
            ecx: w[6],
            eax: w[7],
        }
    }
}

/// Register state saved on entry to the kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub regs: PushRegs,
    pub es: u32,
    pub ds: u32,
    pub trapno: u32,
    pub err: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TrapFrame {
    pub const WORDS: usize = PushRegs::WORDS + 9;
    pub const SIZE: u32 = (Self::WORDS * 4) as u32;

    /// Initial frame for a fresh user process: user selectors, interrupts
    /// enabled, everything else zero. The caller sets `esp` and `eip`.
    pub fn user_initial(esp: u32) -> Self {
        Self {
            ds: GD_UD | DPL_USER,
            es: GD_UD | DPL_USER,
            ss: GD_UD | DPL_USER,
            cs: GD_UT | DPL_USER,
            esp,
            eflags: FL_IF,
            ..Self::default()
        }
    }

    /// Frame for a trap taken while a CPU was executing kernel code.
    pub fn kernel(trapno: u32) -> Self {
        Self {
            ds: GD_KD,
            es: GD_KD,
            ss: GD_KD,
            cs: GD_KT,
            trapno,
            ..Self::default()
        }
    }

    /// Whether the trap was taken from user mode.
    pub fn is_user(&self) -> bool {
        self.cs & 3 == DPL_USER
    }

    /// System call number and arguments: `eax` holds the number and
    /// `edx, ecx, ebx, edi, esi` the five arguments.
    pub fn syscall_args(&self) -> (u32, [u32; 5]) {
        let r = &self.regs;
        (r.eax, [r.edx, r.ecx, r.ebx, r.edi, r.esi])
    }

    /// Loads a system call request into the registers.
    pub fn set_syscall_args(&mut self, num: u32, args: [u32; 5]) {
        self.regs.eax = num;
        self.regs.edx = args[0];
        self.regs.ecx = args[1];
        self.regs.ebx = args[2];
        self.regs.edi = args[3];
        self.regs.esi = args[4];
    }

    /// Forces user segments, enables interrupts and drops I/O privilege, so a
    /// frame supplied by user code cannot escalate privilege.
    pub fn sanitize_for_user(&mut self) {
        self.cs = GD_UT | DPL_USER;
        self.ds = GD_UD | DPL_USER;
        self.es = GD_UD | DPL_USER;
        self.ss = GD_UD | DPL_USER;
        self.eflags = (self.eflags | FL_IF) & !FL_IOPL_MASK;
    }

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        let mut w = [0u32; Self::WORDS];
        w[..PushRegs::WORDS].copy_from_slice(&self.regs.to_words());
        w[8..].copy_from_slice(&[
            self.es,
            self.ds,
            self.trapno,
            self.err,
            self.eip,
            self.cs,
            self.eflags,
            self.esp,
            self.ss,
        ]);
        w
    }

    pub fn from_words(w: &[u32; Self::WORDS]) -> Self {
        Self {
            regs: PushRegs::from_words(&w[..PushRegs::WORDS]),
            es: w[8],
            ds: w[9],
            trapno: w[10],
            err: w[11],
            eip: w[12],
            cs: w[13],
            eflags: w[14],
            esp: w[15],
            ss: w[16],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE as usize] {
        words_to_bytes(&self.to_words())
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE as usize]) -> Self {
        Self::from_words(&bytes_to_words(bytes))
    }
}

impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.regs;
        writeln!(f, "TRAP frame")?;
        writeln!(f, "  edi  {:#010x}", r.edi)?;
        writeln!(f, "  esi  {:#010x}", r.esi)?;
        writeln!(f, "  ebp  {:#010x}", r.ebp)?;
        writeln!(f, "  oesp {:#010x}", r.oesp)?;
        writeln!(f, "  ebx  {:#010x}", r.ebx)?;
        writeln!(f, "  edx  {:#010x}", r.edx)?;
        writeln!(f, "  ecx  {:#010x}", r.ecx)?;
        writeln!(f, "  eax  {:#010x}", r.eax)?;
        writeln!(f, "  es   {:#06x}", self.es)?;
        writeln!(f, "  ds   {:#06x}", self.ds)?;
        writeln!(f, "  trap {:#010x} {}", self.trapno, trap_name(self.trapno))?;
        writeln!(f, "  err  {:#010x}", self.err)?;
        writeln!(f, "  eip  {:#010x}", self.eip)?;
        writeln!(f, "  cs   {:#06x}", self.cs)?;
        writeln!(f, "  flag {:#010x}", self.eflags)?;
        writeln!(f, "  esp  {:#010x}", self.esp)?;
        write!(f, "  ss   {:#06x}", self.ss)
    }
}

/// Frame the kernel pushes on the user exception stack before entering a
/// process's page-fault upcall. The upcall restores from it to resume the
/// faulting instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: u32,
    pub err: u32,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

impl UTrapframe {
    pub const WORDS: usize = PushRegs::WORDS + 5;
    pub const SIZE: u32 = (Self::WORDS * 4) as u32;

    /// Builds the upcall frame from the saved trap-time state.
    pub fn from_trap(tf: &TrapFrame, fault_va: u32) -> Self {
        Self {
            fault_va,
            err: tf.err,
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        }
    }

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        let mut w = [0u32; Self::WORDS];
        w[0] = self.fault_va;
        w[1] = self.err;
        w[2..10].copy_from_slice(&self.regs.to_words());
        w[10] = self.eip;
        w[11] = self.eflags;
        w[12] = self.esp;
        w
    }

    pub fn from_words(w: &[u32; Self::WORDS]) -> Self {
        Self {
            fault_va: w[0],
            err: w[1],
            regs: PushRegs::from_words(&w[2..10]),
            eip: w[10],
            eflags: w[11],
            esp: w[12],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE as usize] {
        words_to_bytes(&self.to_words())
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE as usize]) -> Self {
        Self::from_words(&bytes_to_words(bytes))
    }
}

fn words_to_bytes<const W: usize, const B: usize>(words: &[u32; W]) -> [u8; B] {
    let mut out = [0u8; B];
    for (chunk, word) in out.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn bytes_to_words<const B: usize, const W: usize>(bytes: &[u8; B]) -> [u32; W] {
    let mut out = [0u32; W];
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}

/// Human-readable name of a trap number.
pub fn trap_name(trapno: u32) -> &'static str {
    const EXCEPTIONS: [&str; 20] = [
        "Divide error",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "BOUND Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack Fault",
        "General Protection",
        "Page Fault",
        "(unknown trap)",
        "x87 FPU Floating-Point Error",
        "Alignment Check",
        "Machine-Check",
        "SIMD Floating-Point Exception",
    ];

    match trapno {
        n if (n as usize) < EXCEPTIONS.len() => EXCEPTIONS[n as usize],
        T_SYSCALL => "System call",
        T_RESCHEDULE => "Reschedule IPI",
        n if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&n) => "Hardware Interrupt",
        n if n == IRQ_OFFSET + IRQ_ERROR => "LAPIC error",
        _ => "(unknown trap)",
    }
}
