//! The context-model virtual machine.
//!
//! A block header carries two bytecode programs: the context-hashing program
//! run once per whole byte to refill the `H[]` array that components index,
//! and an optional postprocessing program fed each decoded byte.  Both run on
//! the same machine: registers `a b c d`, flag `f`, a 256-entry register
//! file, byte memory `M` of size `2^hm` and word memory `H` of size `2^hh`.
//!
//! Instructions are one byte, with an immediate operand byte when the low
//! three bits are all set; opcode 255 is a three-byte absolute jump.  An
//! invalid opcode or an out-of-range program counter aborts the block.

use crate::error::{LrzError, Result};

use super::ByteReader;

/// Descriptor length in bytes for each component kind (index = kind).
pub const COMPSIZE: [usize; 256] = {
    let mut t = [0usize; 256];
    t[0] = 0; // end marker
    t[1] = 2; // const
    t[2] = 3; // context map
    t[3] = 2; // indirect context map
    t[4] = 3; // match
    t[5] = 4; // fixed average
    t[6] = 6; // 2-input mixer
    t[7] = 6; // m-input mixer
    t[8] = 3; // indirect SSE
    t[9] = 5; // SSE
    t
};

/// Component kind codes.
pub mod kind {
    pub const NONE: u8 = 0;
    pub const CONS: u8 = 1;
    pub const CM: u8 = 2;
    pub const ICM: u8 = 3;
    pub const MATCH: u8 = 4;
    pub const AVG: u8 = 5;
    pub const MIX2: u8 = 6;
    pub const MIX: u8 = 7;
    pub const ISSE: u8 = 8;
    pub const SSE: u8 = 9;
}

fn exec_err<T>() -> Result<T> {
    Err(LrzError::Codec("context model execution error".into()))
}

/// One virtual machine instance: parsed block header plus run state.
pub struct Zpaql {
    /// `hsize[2] hh hm ph pm n COMP 0 (guard) HCOMP 0`
    pub header: Vec<u8>,
    /// One past the end of the component list (including its 0 terminator).
    pub cend: usize,
    /// Start/end of the bytecode section within `header`.
    pub hbegin: usize,
    pub hend: usize,

    /// Word memory, size `2^hh` (or `2^ph` for a postprocessor).
    pub h: Vec<u32>,
    /// Byte memory, size `2^hm` (or `2^pm`).
    pub m: Vec<u8>,
    r: Vec<u32>,
    a: u32,
    b: u32,
    c: u32,
    d: u32,
    f: bool,
    pc: usize,

    /// Bytes emitted by the `out` instruction; drained by the driver.
    pub out: Vec<u8>,
}

impl Zpaql {
    pub fn new() -> Self {
        Zpaql {
            header: Vec::new(),
            cend: 0,
            hbegin: 0,
            hend: 0,
            h: Vec::new(),
            m: Vec::new(),
            r: Vec::new(),
            a: 0,
            b: 0,
            c: 0,
            d: 0,
            f: false,
            pc: 0,
            out: Vec::new(),
        }
    }

    /// Drop the parsed program and all run state.
    pub fn clear(&mut self) {
        self.cend = 0;
        self.hbegin = 0;
        self.hend = 0;
        self.a = 0;
        self.b = 0;
        self.c = 0;
        self.d = 0;
        self.f = false;
        self.pc = 0;
        self.header.clear();
        self.h.clear();
        self.m.clear();
        self.r.clear();
    }

    /// Parse a block-header body (length prefix, parameters, component list,
    /// bytecode) from `input`.  Returns the total parsed length.
    pub fn read(&mut self, input: &mut ByteReader<'_>) -> Result<usize> {
        let mut get = |what: &str| -> Result<u8> {
            input
                .get()
                .ok_or_else(|| LrzError::Codec(format!("unexpected end of {what}")))
        };

        let hsize = usize::from(get("header size")?) + 256 * usize::from(get("header size")?);
        self.header = vec![0u8; hsize + 300];
        self.cend = 0;
        self.hbegin = 0;
        self.hend = 0;
        self.header[0] = (hsize & 255) as u8;
        self.header[1] = (hsize >> 8) as u8;
        self.cend = 2;
        while self.cend < 7 {
            self.header[self.cend] = get("header parameters")?;
            self.cend += 1;
        }

        let n = usize::from(self.header[6]);
        for _ in 0..n {
            let ty = get("component list")?;
            self.header[self.cend] = ty;
            self.cend += 1;
            let size = COMPSIZE[usize::from(ty)];
            if size < 1 {
                return Err(LrzError::Codec(format!("invalid component type {ty}")));
            }
            if self.cend + size > self.header.len() - 8 {
                return Err(LrzError::Codec("component list too big".into()));
            }
            for _ in 1..size {
                self.header[self.cend] = get("component list")?;
                self.cend += 1;
            }
        }
        let end = get("component terminator")?;
        self.header[self.cend] = end;
        self.cend += 1;
        if end != 0 {
            return Err(LrzError::Codec("missing component list terminator".into()));
        }

        // A 128-byte guard gap separates the component list from the
        // bytecode so relative jumps cannot escape into it unnoticed.
        self.hbegin = self.cend + 128;
        self.hend = self.hbegin;
        while self.hend < hsize + 129 {
            if self.hend >= self.header.len() - 8 {
                return Err(LrzError::Codec("bytecode section too big".into()));
            }
            self.header[self.hend] = get("bytecode")?;
            self.hend += 1;
        }
        let end = get("bytecode terminator")?;
        self.header[self.hend] = end;
        self.hend += 1;
        if end != 0 {
            return Err(LrzError::Codec("missing bytecode terminator".into()));
        }
        if hsize != self.cend - 2 + self.hend - self.hbegin {
            return Err(LrzError::Codec("header length mismatch".into()));
        }
        Ok(self.cend + self.hend - self.hbegin)
    }

    /// Number of model components declared by the header.
    pub fn n_components(&self) -> usize {
        usize::from(self.header[6])
    }

    /// Initialize run state for the context-hashing program (`hh`, `hm`).
    pub fn inith(&mut self) {
        let hh = self.header[2];
        let hm = self.header[3];
        self.init(hh, hm);
    }

    /// Initialize run state for the postprocessing program (`ph`, `pm`).
    pub fn initp(&mut self) {
        let ph = self.header[4];
        let pm = self.header[5];
        self.init(ph, pm);
    }

    fn init(&mut self, hbits: u8, mbits: u8) {
        self.h = vec![0u32; 1usize << hbits];
        self.m = vec![0u8; 1usize << mbits];
        self.r = vec![0u32; 256];
        self.a = 0;
        self.b = 0;
        self.c = 0;
        self.d = 0;
        self.f = false;
        self.pc = 0;
    }

    /// Run the program with `input` in register `a` until it halts.
    pub fn run(&mut self, input: u32) -> Result<()> {
        self.pc = self.hbegin;
        self.a = input;
        while self.execute()? {}
        Ok(())
    }

    pub fn outc(&mut self, c: i32) {
        if c >= 0 {
            self.out.push((c & 255) as u8);
        }
    }

    #[inline]
    fn mget(&self, idx: u32) -> u32 {
        u32::from(self.m[idx as usize & (self.m.len() - 1)])
    }

    #[inline]
    fn mset(&mut self, idx: u32, v: u32) {
        let mask = self.m.len() - 1;
        self.m[idx as usize & mask] = (v & 255) as u8;
    }

    #[inline]
    fn hget(&self, idx: u32) -> u32 {
        self.h[idx as usize & (self.h.len() - 1)]
    }

    #[inline]
    fn hset(&mut self, idx: u32, v: u32) {
        let mask = self.h.len() - 1;
        self.h[idx as usize & mask] = v;
    }

    /// Fetch the immediate operand byte.
    #[inline]
    fn imm(&mut self) -> u32 {
        let v = u32::from(self.header[self.pc]);
        self.pc += 1;
        v
    }

    #[inline]
    fn jump_rel(&mut self) {
        let disp = ((i32::from(self.header[self.pc]) + 128) & 255) - 127;
        self.pc = (self.pc as i64 + i64::from(disp)) as usize;
    }

    fn div(&mut self, v: u32) {
        self.a = if v != 0 { self.a / v } else { 0 };
    }

    fn rem(&mut self, v: u32) {
        self.a = if v != 0 { self.a % v } else { 0 };
    }

    /// Execute one instruction.  Returns `false` after HALT.
    fn execute(&mut self) -> Result<bool> {
        if self.pc < self.hbegin || self.pc >= self.header.len() {
            return exec_err();
        }
        let op = self.header[self.pc];
        self.pc += 1;
        match op {
            1 => self.a = self.a.wrapping_add(1),
            2 => self.a = self.a.wrapping_sub(1),
            3 => self.a = !self.a,
            4 => self.a = 0,
            7 => {
                let n = self.imm() as usize;
                self.a = self.r[n];
            }
            8 => std::mem::swap(&mut self.a, &mut self.b),
            9 => self.b = self.b.wrapping_add(1),
            10 => self.b = self.b.wrapping_sub(1),
            11 => self.b = !self.b,
            12 => self.b = 0,
            15 => {
                let n = self.imm() as usize;
                self.b = self.r[n];
            }
            16 => std::mem::swap(&mut self.a, &mut self.c),
            17 => self.c = self.c.wrapping_add(1),
            18 => self.c = self.c.wrapping_sub(1),
            19 => self.c = !self.c,
            20 => self.c = 0,
            23 => {
                let n = self.imm() as usize;
                self.c = self.r[n];
            }
            24 => std::mem::swap(&mut self.a, &mut self.d),
            25 => self.d = self.d.wrapping_add(1),
            26 => self.d = self.d.wrapping_sub(1),
            27 => self.d = !self.d,
            28 => self.d = 0,
            31 => {
                let n = self.imm() as usize;
                self.d = self.r[n];
            }
            32 => {
                let tmp = self.mget(self.b);
                self.mset(self.b, self.a);
                self.a = tmp;
            }
            33 => {
                let v = self.mget(self.b).wrapping_add(1);
                self.mset(self.b, v);
            }
            34 => {
                let v = self.mget(self.b).wrapping_sub(1);
                self.mset(self.b, v);
            }
            35 => {
                let v = !self.mget(self.b);
                self.mset(self.b, v);
            }
            36 => self.mset(self.b, 0),
            39 => {
                if self.f {
                    self.jump_rel();
                } else {
                    self.pc += 1;
                }
            }
            40 => {
                let tmp = self.mget(self.c);
                self.mset(self.c, self.a);
                self.a = tmp;
            }
            41 => {
                let v = self.mget(self.c).wrapping_add(1);
                self.mset(self.c, v);
            }
            42 => {
                let v = self.mget(self.c).wrapping_sub(1);
                self.mset(self.c, v);
            }
            43 => {
                let v = !self.mget(self.c);
                self.mset(self.c, v);
            }
            44 => self.mset(self.c, 0),
            47 => {
                if !self.f {
                    self.jump_rel();
                } else {
                    self.pc += 1;
                }
            }
            48 => {
                let tmp = self.hget(self.d);
                self.hset(self.d, self.a);
                self.a = tmp;
            }
            49 => {
                let v = self.hget(self.d).wrapping_add(1);
                self.hset(self.d, v);
            }
            50 => {
                let v = self.hget(self.d).wrapping_sub(1);
                self.hset(self.d, v);
            }
            51 => {
                let v = !self.hget(self.d);
                self.hset(self.d, v);
            }
            52 => self.hset(self.d, 0),
            55 => {
                let n = self.imm() as usize;
                self.r[n] = self.a;
            }
            56 => return Ok(false),
            57 => {
                let c = (self.a & 255) as i32;
                self.outc(c);
            }
            59 => self.a = self.a.wrapping_add(self.mget(self.b)).wrapping_add(512).wrapping_mul(773),
            60 => {
                let v = self
                    .hget(self.d)
                    .wrapping_add(self.a)
                    .wrapping_add(512)
                    .wrapping_mul(773);
                self.hset(self.d, v);
            }
            63 => self.jump_rel(),
            64 => {}
            65 => self.a = self.b,
            66 => self.a = self.c,
            67 => self.a = self.d,
            68 => self.a = self.mget(self.b),
            69 => self.a = self.mget(self.c),
            70 => self.a = self.hget(self.d),
            71 => self.a = self.imm(),
            72 => self.b = self.a,
            73 => {}
            74 => self.b = self.c,
            75 => self.b = self.d,
            76 => self.b = self.mget(self.b),
            77 => self.b = self.mget(self.c),
            78 => self.b = self.hget(self.d),
            79 => self.b = self.imm(),
            80 => self.c = self.a,
            81 => self.c = self.b,
            82 => {}
            83 => self.c = self.d,
            84 => self.c = self.mget(self.b),
            85 => self.c = self.mget(self.c),
            86 => self.c = self.hget(self.d),
            87 => self.c = self.imm(),
            88 => self.d = self.a,
            89 => self.d = self.b,
            90 => self.d = self.c,
            91 => {}
            92 => self.d = self.mget(self.b),
            93 => self.d = self.mget(self.c),
            94 => self.d = self.hget(self.d),
            95 => self.d = self.imm(),
            96 => self.mset(self.b, self.a),
            97 => self.mset(self.b, self.b),
            98 => self.mset(self.b, self.c),
            99 => self.mset(self.b, self.d),
            100 => {}
            101 => {
                let v = self.mget(self.c);
                self.mset(self.b, v);
            }
            102 => {
                let v = self.hget(self.d);
                self.mset(self.b, v);
            }
            103 => {
                let v = self.imm();
                self.mset(self.b, v);
            }
            104 => self.mset(self.c, self.a),
            105 => self.mset(self.c, self.b),
            106 => self.mset(self.c, self.c),
            107 => self.mset(self.c, self.d),
            108 => {
                let v = self.mget(self.b);
                self.mset(self.c, v);
            }
            109 => {}
            110 => {
                let v = self.hget(self.d);
                self.mset(self.c, v);
            }
            111 => {
                let v = self.imm();
                self.mset(self.c, v);
            }
            112 => self.hset(self.d, self.a),
            113 => self.hset(self.d, self.b),
            114 => self.hset(self.d, self.c),
            115 => self.hset(self.d, self.d),
            116 => {
                let v = self.mget(self.b);
                self.hset(self.d, v);
            }
            117 => {
                let v = self.mget(self.c);
                self.hset(self.d, v);
            }
            118 => {}
            119 => {
                let v = self.imm();
                self.hset(self.d, v);
            }
            128 => self.a = self.a.wrapping_add(self.a),
            129 => self.a = self.a.wrapping_add(self.b),
            130 => self.a = self.a.wrapping_add(self.c),
            131 => self.a = self.a.wrapping_add(self.d),
            132 => self.a = self.a.wrapping_add(self.mget(self.b)),
            133 => self.a = self.a.wrapping_add(self.mget(self.c)),
            134 => self.a = self.a.wrapping_add(self.hget(self.d)),
            135 => {
                let v = self.imm();
                self.a = self.a.wrapping_add(v);
            }
            136 => self.a = 0,
            137 => self.a = self.a.wrapping_sub(self.b),
            138 => self.a = self.a.wrapping_sub(self.c),
            139 => self.a = self.a.wrapping_sub(self.d),
            140 => self.a = self.a.wrapping_sub(self.mget(self.b)),
            141 => self.a = self.a.wrapping_sub(self.mget(self.c)),
            142 => self.a = self.a.wrapping_sub(self.hget(self.d)),
            143 => {
                let v = self.imm();
                self.a = self.a.wrapping_sub(v);
            }
            144 => self.a = self.a.wrapping_mul(self.a),
            145 => self.a = self.a.wrapping_mul(self.b),
            146 => self.a = self.a.wrapping_mul(self.c),
            147 => self.a = self.a.wrapping_mul(self.d),
            148 => self.a = self.a.wrapping_mul(self.mget(self.b)),
            149 => self.a = self.a.wrapping_mul(self.mget(self.c)),
            150 => self.a = self.a.wrapping_mul(self.hget(self.d)),
            151 => {
                let v = self.imm();
                self.a = self.a.wrapping_mul(v);
            }
            152 => self.div(self.a),
            153 => self.div(self.b),
            154 => self.div(self.c),
            155 => self.div(self.d),
            156 => {
                let v = self.mget(self.b);
                self.div(v);
            }
            157 => {
                let v = self.mget(self.c);
                self.div(v);
            }
            158 => {
                let v = self.hget(self.d);
                self.div(v);
            }
            159 => {
                let v = self.imm();
                self.div(v);
            }
            160 => self.rem(self.a),
            161 => self.rem(self.b),
            162 => self.rem(self.c),
            163 => self.rem(self.d),
            164 => {
                let v = self.mget(self.b);
                self.rem(v);
            }
            165 => {
                let v = self.mget(self.c);
                self.rem(v);
            }
            166 => {
                let v = self.hget(self.d);
                self.rem(v);
            }
            167 => {
                let v = self.imm();
                self.rem(v);
            }
            168 => {}
            169 => self.a &= self.b,
            170 => self.a &= self.c,
            171 => self.a &= self.d,
            172 => self.a &= self.mget(self.b),
            173 => self.a &= self.mget(self.c),
            174 => self.a &= self.hget(self.d),
            175 => {
                let v = self.imm();
                self.a &= v;
            }
            176 => self.a = 0,
            177 => self.a &= !self.b,
            178 => self.a &= !self.c,
            179 => self.a &= !self.d,
            180 => self.a &= !self.mget(self.b),
            181 => self.a &= !self.mget(self.c),
            182 => self.a &= !self.hget(self.d),
            183 => {
                let v = self.imm();
                self.a &= !v;
            }
            184 => {}
            185 => self.a |= self.b,
            186 => self.a |= self.c,
            187 => self.a |= self.d,
            188 => self.a |= self.mget(self.b),
            189 => self.a |= self.mget(self.c),
            190 => self.a |= self.hget(self.d),
            191 => {
                let v = self.imm();
                self.a |= v;
            }
            192 => self.a = 0,
            193 => self.a ^= self.b,
            194 => self.a ^= self.c,
            195 => self.a ^= self.d,
            196 => self.a ^= self.mget(self.b),
            197 => self.a ^= self.mget(self.c),
            198 => self.a ^= self.hget(self.d),
            199 => {
                let v = self.imm();
                self.a ^= v;
            }
            200 => self.a = self.a.wrapping_shl(self.a & 31),
            201 => self.a = self.a.wrapping_shl(self.b & 31),
            202 => self.a = self.a.wrapping_shl(self.c & 31),
            203 => self.a = self.a.wrapping_shl(self.d & 31),
            204 => self.a = self.a.wrapping_shl(self.mget(self.b) & 31),
            205 => self.a = self.a.wrapping_shl(self.mget(self.c) & 31),
            206 => self.a = self.a.wrapping_shl(self.hget(self.d) & 31),
            207 => {
                let v = self.imm();
                self.a = self.a.wrapping_shl(v & 31);
            }
            208 => self.a = self.a.wrapping_shr(self.a & 31),
            209 => self.a = self.a.wrapping_shr(self.b & 31),
            210 => self.a = self.a.wrapping_shr(self.c & 31),
            211 => self.a = self.a.wrapping_shr(self.d & 31),
            212 => self.a = self.a.wrapping_shr(self.mget(self.b) & 31),
            213 => self.a = self.a.wrapping_shr(self.mget(self.c) & 31),
            214 => self.a = self.a.wrapping_shr(self.hget(self.d) & 31),
            215 => {
                let v = self.imm();
                self.a = self.a.wrapping_shr(v & 31);
            }
            216 => self.f = true,
            217 => self.f = self.a == self.b,
            218 => self.f = self.a == self.c,
            219 => self.f = self.a == self.d,
            220 => self.f = self.a == self.mget(self.b),
            221 => self.f = self.a == self.mget(self.c),
            222 => self.f = self.a == self.hget(self.d),
            223 => {
                let v = self.imm();
                self.f = self.a == v;
            }
            224 => self.f = false,
            225 => self.f = self.a < self.b,
            226 => self.f = self.a < self.c,
            227 => self.f = self.a < self.d,
            228 => self.f = self.a < self.mget(self.b),
            229 => self.f = self.a < self.mget(self.c),
            230 => self.f = self.a < self.hget(self.d),
            231 => {
                let v = self.imm();
                self.f = self.a < v;
            }
            232 => self.f = false,
            233 => self.f = self.a > self.b,
            234 => self.f = self.a > self.c,
            235 => self.f = self.a > self.d,
            236 => self.f = self.a > self.mget(self.b),
            237 => self.f = self.a > self.mget(self.c),
            238 => self.f = self.a > self.hget(self.d),
            239 => {
                let v = self.imm();
                self.f = self.a > v;
            }
            255 => {
                if self.pc + 1 >= self.header.len() {
                    return exec_err();
                }
                let target = self.hbegin
                    + usize::from(self.header[self.pc])
                    + 256 * usize::from(self.header[self.pc + 1]);
                if target >= self.hend {
                    return exec_err();
                }
                self.pc = target;
            }
            _ => return exec_err(),
        }
        Ok(true)
    }
}

impl Default for Zpaql {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds decoded bytes through the optional postprocessing program.
///
/// The first decoded byte of a block selects pass-through or a program; in
/// program mode the next two bytes give the program length, the program body
/// follows, and only then does data start flowing through `run`.
pub struct PostProcessor {
    state: u32,
    hsize: usize,
    ph: u8,
    pm: u8,
    pub z: Zpaql,
}

impl PostProcessor {
    pub fn new(ph: u8, pm: u8) -> Self {
        PostProcessor {
            state: 0,
            hsize: 0,
            ph,
            pm,
            z: Zpaql::new(),
        }
    }

    /// Feed one decoded byte (or -1 at end of stream).  Output accumulates
    /// in `self.z.out`.
    pub fn write(&mut self, c: i32) -> Result<()> {
        match self.state {
            0 => {
                if c < 0 {
                    return Err(LrzError::Codec("unexpected end of stream".into()));
                }
                self.state = (c + 1) as u32;
                if self.state > 2 {
                    return Err(LrzError::Codec(format!(
                        "unknown postprocessing type {c}"
                    )));
                }
                if self.state == 1 {
                    self.z.clear();
                }
            }
            1 => self.z.outc(c),
            2 => {
                if c < 0 {
                    return Err(LrzError::Codec("unexpected end of stream".into()));
                }
                self.hsize = c as usize;
                self.state = 3;
            }
            3 => {
                if c < 0 {
                    return Err(LrzError::Codec("unexpected end of stream".into()));
                }
                self.hsize += (c as usize) * 256;
                self.z.header = vec![0u8; self.hsize + 300];
                self.z.cend = 8;
                self.z.hbegin = self.z.cend + 128;
                self.z.hend = self.z.hbegin;
                self.z.header[4] = self.ph;
                self.z.header[5] = self.pm;
                self.state = 4;
            }
            4 => {
                if c < 0 {
                    return Err(LrzError::Codec("unexpected end of stream".into()));
                }
                self.z.header[self.z.hend] = (c & 255) as u8;
                self.z.hend += 1;
                if self.z.hend - self.z.hbegin == self.hsize {
                    let total = self.z.cend - 2 + self.z.hend - self.z.hbegin;
                    self.z.header[0] = (total & 255) as u8;
                    self.z.header[1] = (total >> 8) as u8;
                    self.z.initp();
                    self.state = 5;
                }
            }
            5 => {
                self.z.run(c as u32)?;
            }
            _ => unreachable!(),
        }
        Ok(())
    }
}
