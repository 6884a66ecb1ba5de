//! Resumable modular exponentiation.
//!
//! A 3072-bit `modpow` takes long enough on small devices to starve every
//! other connection, so [`ExpModJob`] splits sliding-window exponentiation
//! into steps. Each [`ExpModJob::advance`] call consumes one exponent bit
//! (completing a window when the bit closes one); the first call builds the
//! window table and the last one flushes the trailing partial window.

use hapd_core::error::CryptoError;
use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Inputs of one `base^exponent mod modulus` computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpModRequest {
    pub base: BigUint,
    pub exponent: BigUint,
    pub modulus: BigUint,
}

/// Outcome of a single [`ExpModJob::advance`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Done(BigUint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Precompute,
    Scan,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// Still skipping leading zero bits.
    Leading,
    /// Between windows; zero bits square the accumulator.
    Idle,
    /// Collecting bits into the current window.
    Window,
}

/// Step-wise sliding-window exponentiation.
#[derive(Debug, Clone)]
pub struct ExpModJob {
    base: BigUint,
    modulus: BigUint,
    exponent_le: Vec<u8>,
    bit_len: usize,
    window: usize,
    table: Vec<BigUint>,
    acc: BigUint,
    cursor: usize,
    scan: Scan,
    nbits: usize,
    wbits: usize,
    phase: Phase,
    result: Option<BigUint>,
}

impl ExpModRequest {
    pub fn new(base: BigUint, exponent: BigUint, modulus: BigUint) -> Self {
        Self {
            base,
            exponent,
            modulus,
        }
    }

    /// Compute the result in one call.
    pub fn compute(&self) -> Result<BigUint, CryptoError> {
        if self.modulus.is_zero() {
            return Err(CryptoError::InvalidModulus("modulus is zero".to_string()));
        }
        Ok(self.base.modpow(&self.exponent, &self.modulus))
    }

    pub fn into_job(self) -> Result<ExpModJob, CryptoError> {
        ExpModJob::new(self.base, self.exponent, self.modulus)
    }
}

/// Window width used for an exponent of `bit_len` bits.
pub fn window_size(bit_len: usize) -> usize {
    match bit_len {
        n if n > 671 => 6,
        n if n > 239 => 5,
        n if n > 79 => 4,
        n if n > 23 => 3,
        _ => 1,
    }
}

impl ExpModJob {
    pub fn new(base: BigUint, exponent: BigUint, modulus: BigUint) -> Result<Self, CryptoError> {
        if modulus.is_zero() {
            return Err(CryptoError::InvalidModulus("modulus is zero".to_string()));
        }
        let bit_len = exponent.bits() as usize;
        let exponent_le = if bit_len == 0 {
            Vec::new()
        } else {
            exponent.to_bytes_le()
        };
        let window = window_size(bit_len);
        tracing::trace!(
            bit_len,
            window,
            modulus_bits = modulus.bits(),
            steps = 1 + bit_len.max(1),
            "Exponentiation job created"
        );

        Ok(Self {
            base,
            modulus,
            exponent_le,
            bit_len,
            window,
            table: Vec::new(),
            acc: BigUint::one(),
            cursor: 0,
            scan: Scan::Leading,
            nbits: 0,
            wbits: 0,
            phase: Phase::Precompute,
            result: None,
        })
    }

    /// Number of exponent bits.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Calls to [`ExpModJob::advance`] still needed before `Done`.
    pub fn steps_remaining(&self) -> usize {
        match self.phase {
            Phase::Precompute => 1 + self.bit_len.max(1),
            Phase::Scan => (self.bit_len - self.cursor).max(1),
            Phase::Done => 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Perform one unit of work.
    pub fn advance(&mut self) -> Progress {
        match self.phase {
            Phase::Precompute => {
                self.precompute();
                self.phase = Phase::Scan;
                Progress::Pending
            }
            Phase::Scan => {
                if self.cursor < self.bit_len {
                    let bit = self.bit_at(self.cursor);
                    self.cursor += 1;
                    self.consume(bit);
                }
                if self.cursor < self.bit_len {
                    return Progress::Pending;
                }
                let result = self.finish();
                self.phase = Phase::Done;
                self.result = Some(result.clone());
                Progress::Done(result)
            }
            Phase::Done => Progress::Done(self.result.clone().unwrap_or_default()),
        }
    }

    /// Drive the job to completion.
    pub fn run(mut self) -> BigUint {
        loop {
            if let Progress::Done(value) = self.advance() {
                return value;
            }
        }
    }

    /// Exponent bit at `pos`, counted from the most significant bit.
    fn bit_at(&self, pos: usize) -> usize {
        let bit = self.bit_len - 1 - pos;
        ((self.exponent_le[bit / 8] >> (bit % 8)) & 1) as usize
    }

    fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.modulus
    }

    fn square_acc(&mut self) {
        self.acc = self.mul(&self.acc, &self.acc);
    }

    fn precompute(&mut self) {
        let size = 1usize << self.window;
        let first = &self.base % &self.modulus;
        let mut table = vec![BigUint::zero(); size];

        if self.window > 1 {
            let half = 1usize << (self.window - 1);
            let mut entry = first.clone();
            for _ in 0..self.window - 1 {
                entry = self.mul(&entry, &entry);
            }
            table[half] = entry;
            for i in half + 1..size {
                table[i] = self.mul(&table[i - 1], &first);
            }
        }
        table[1] = first;
        self.table = table;
    }

    fn consume(&mut self, bit: usize) {
        match (bit, self.scan) {
            (0, Scan::Leading) => {}
            (0, Scan::Idle) => self.square_acc(),
            _ => {
                self.scan = Scan::Window;
                self.nbits += 1;
                self.wbits |= bit << (self.window - self.nbits);

                if self.nbits == self.window {
                    for _ in 0..self.window {
                        self.square_acc();
                    }
                    self.acc = self.mul(&self.acc, &self.table[self.wbits]);
                    self.scan = Scan::Idle;
                    self.nbits = 0;
                    self.wbits = 0;
                }
            }
        }
    }

    fn finish(&mut self) -> BigUint {
        let top = 1usize << self.window;
        for _ in 0..self.nbits {
            self.square_acc();
            self.wbits <<= 1;
            if self.wbits & top != 0 {
                self.acc = self.mul(&self.acc, &self.table[1]);
            }
        }
        self.nbits = 0;
        self.wbits = 0;
        &self.acc % &self.modulus
    }
}
