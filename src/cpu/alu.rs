//! Flag-exact arithmetic. Every function takes the operands and the current
//! flags and returns the result together with the new flags; nothing here
//! touches CPU state.

use crate::cpu::{CpuFeatures, Flags};

#[cfg(test)]
#[path = "./alu_test.rs"]
mod alu_test;

/// operand size
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::Byte => 8,
            Width::Word => 16,
            Width::Dword => 32,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }

    pub fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Dword => 0xFFFF_FFFF,
        }
    }

    pub fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    /// sign extends the low `bits()` of `v` to 32 bits
    pub fn sign_extend(self, v: u32) -> u32 {
        match self {
            Width::Byte => v as u8 as i8 as i32 as u32,
            Width::Word => v as u16 as i16 as i32 as u32,
            Width::Dword => v,
        }
    }

    fn signed(self, v: u32) -> i64 {
        i64::from(self.sign_extend(v) as i32)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Width::Byte => "byte",
            Width::Word => "word",
            Width::Dword => "dword",
        }
    }
}

/// the eight ALU operations of opcodes 0x00-0x3F and group 1
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add, Or, Adc, Sbb, And, Sub, Xor, Cmp,
}

impl AluOp {
    pub fn from_index(n: u8) -> AluOp {
        match n & 7 {
            0 => AluOp::Add,
            1 => AluOp::Or,
            2 => AluOp::Adc,
            3 => AluOp::Sbb,
            4 => AluOp::And,
            5 => AluOp::Sub,
            6 => AluOp::Xor,
            _ => AluOp::Cmp,
        }
    }
}

/// the shift group (ModR/M reg field of 0xC0, 0xC1, 0xD0-0xD3)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ShiftOp {
    Rol, Ror, Rcl, Rcr, Shl, Shr, Sal, Sar,
}

impl ShiftOp {
    pub fn from_index(n: u8) -> ShiftOp {
        match n & 7 {
            0 => ShiftOp::Rol,
            1 => ShiftOp::Ror,
            2 => ShiftOp::Rcl,
            3 => ShiftOp::Rcr,
            4 => ShiftOp::Shl,
            5 => ShiftOp::Shr,
            6 => ShiftOp::Sal,
            _ => ShiftOp::Sar,
        }
    }
}

fn msb(v: u32, w: Width) -> bool {
    v & w.sign_bit() != 0
}

pub fn binary(op: AluOp, dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    match op {
        AluOp::Add => add(dst, src, w, f),
        AluOp::Or => or(dst, src, w, f),
        AluOp::Adc => adc(dst, src, w, f),
        AluOp::Sbb => sbb(dst, src, w, f),
        AluOp::And => and(dst, src, w, f),
        AluOp::Sub | AluOp::Cmp => sub(dst, src, w, f),
        AluOp::Xor => xor(dst, src, w, f),
    }
}

fn add_with_carry(dst: u32, src: u32, carry: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let (dst, src) = (dst & w.mask(), src & w.mask());
    let wide = u64::from(dst) + u64::from(src) + u64::from(carry);
    let res = wide as u32 & w.mask();
    f.carry = wide >> w.bits() != 0;
    f.overflow = msb((res ^ dst) & (res ^ src), w);
    f.adjust = (res ^ src ^ dst) & 0x10 != 0;
    f.set_szp(res, w);
    (res, f)
}

fn sub_with_borrow(dst: u32, src: u32, borrow: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let (dst, src) = (dst & w.mask(), src & w.mask());
    let wide = u64::from(dst).wrapping_sub(u64::from(src)).wrapping_sub(u64::from(borrow));
    let res = wide as u32 & w.mask();
    f.carry = u64::from(dst) < u64::from(src) + u64::from(borrow);
    f.overflow = msb((dst ^ src) & (dst ^ res), w);
    f.adjust = (res ^ src ^ dst) & 0x10 != 0;
    f.set_szp(res, w);
    (res, f)
}

pub fn add(dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    add_with_carry(dst, src, 0, w, f)
}

pub fn adc(dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    add_with_carry(dst, src, f.carry_val(), w, f)
}

pub fn sub(dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    sub_with_borrow(dst, src, 0, w, f)
}

pub fn sbb(dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    sub_with_borrow(dst, src, f.carry_val(), w, f)
}

fn logic(res: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let res = res & w.mask();
    f.carry = false;
    f.overflow = false;
    f.adjust = false;
    f.set_szp(res, w);
    (res, f)
}

pub fn and(dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    logic(dst & src, w, f)
}

pub fn or(dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    logic(dst | src, w, f)
}

pub fn xor(dst: u32, src: u32, w: Width, f: Flags) -> (u32, Flags) {
    logic(dst ^ src, w, f)
}

/// INC leaves CF untouched
pub fn inc(dst: u32, w: Width, f: Flags) -> (u32, Flags) {
    let (res, mut nf) = add(dst, 1, w, f);
    nf.carry = f.carry;
    (res, nf)
}

/// DEC leaves CF untouched
pub fn dec(dst: u32, w: Width, f: Flags) -> (u32, Flags) {
    let (res, mut nf) = sub(dst, 1, w, f);
    nf.carry = f.carry;
    (res, nf)
}

pub fn neg(dst: u32, w: Width, f: Flags) -> (u32, Flags) {
    sub(0, dst, w, f)
}

/// applies a shift group operation, masking the count when the model does
pub fn shift(op: ShiftOp, dst: u32, count: u32, w: Width, f: Flags, features: &CpuFeatures) -> (u32, Flags) {
    let count = if features.mask_shift_count { count & 0x1F } else { count & 0xFF };
    match op {
        ShiftOp::Rol => rol(dst, count, w, f),
        ShiftOp::Ror => ror(dst, count, w, f),
        ShiftOp::Rcl => rcl(dst, count, w, f),
        ShiftOp::Rcr => rcr(dst, count, w, f),
        ShiftOp::Shl | ShiftOp::Sal => shl(dst, count, w, f),
        ShiftOp::Shr => shr(dst, count, w, f),
        ShiftOp::Sar => sar(dst, count, w, f),
    }
}

pub fn shl(dst: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let dst = dst & w.mask();
    if count == 0 {
        return (dst, f);
    }
    let wide = if count > w.bits() { 0 } else { u64::from(dst) << count };
    let res = wide as u32 & w.mask();
    f.carry = (wide >> w.bits()) & 1 != 0;
    f.overflow = msb(res, w) != f.carry;
    f.adjust = false;
    f.set_szp(res, w);
    (res, f)
}

pub fn shr(dst: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let dst = dst & w.mask();
    if count == 0 {
        return (dst, f);
    }
    let last = if count > w.bits() { 0 } else { u64::from(dst) >> (count - 1) };
    let res = (last >> 1) as u32;
    f.carry = last & 1 != 0;
    f.overflow = msb(dst, w);
    f.adjust = false;
    f.set_szp(res, w);
    (res, f)
}

pub fn sar(dst: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let dst = dst & w.mask();
    if count == 0 {
        return (dst, f);
    }
    let count = count.min(w.bits());
    let last = w.signed(dst) >> (count - 1);
    let res = (last >> 1) as u32 & w.mask();
    f.carry = last & 1 != 0;
    f.overflow = false;
    f.adjust = false;
    f.set_szp(res, w);
    (res, f)
}

pub fn rol(dst: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let dst = dst & w.mask();
    if count == 0 {
        return (dst, f);
    }
    let c = count % w.bits();
    let v = u64::from(dst);
    let res = if c == 0 { dst } else { ((v << c) | (v >> (w.bits() - c))) as u32 & w.mask() };
    f.carry = res & 1 != 0;
    f.overflow = msb(res, w) != f.carry;
    (res, f)
}

pub fn ror(dst: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let dst = dst & w.mask();
    if count == 0 {
        return (dst, f);
    }
    let c = count % w.bits();
    let v = u64::from(dst);
    let res = if c == 0 { dst } else { ((v >> c) | (v << (w.bits() - c))) as u32 & w.mask() };
    f.carry = msb(res, w);
    f.overflow = msb(res, w) != msb(res << 1, w);
    (res, f)
}

pub fn rcl(dst: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let mut res = dst & w.mask();
    let c = count % (w.bits() + 1);
    if c == 0 {
        return (res, f);
    }
    let mut carry = f.carry;
    for _ in 0..c {
        let out = msb(res, w);
        res = ((res << 1) | carry as u32) & w.mask();
        carry = out;
    }
    f.carry = carry;
    f.overflow = msb(res, w) != carry;
    (res, f)
}

pub fn rcr(dst: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let mut res = dst & w.mask();
    let c = count % (w.bits() + 1);
    if c == 0 {
        return (res, f);
    }
    let mut carry = f.carry;
    for _ in 0..c {
        let out = res & 1 != 0;
        res = (res >> 1) | if carry { w.sign_bit() } else { 0 };
        carry = out;
    }
    f.carry = carry;
    f.overflow = msb(res, w) != msb(res << 1, w);
    (res, f)
}

/// double precision shift left of `dst`, filling from `src`. count is masked to 5 bits
pub fn shld(dst: u32, src: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let (dst, src) = (dst & w.mask(), src & w.mask());
    let count = count & 0x1F;
    if count == 0 {
        return (dst, f);
    }
    let bits = w.bits();
    let joined = (u128::from(dst) << bits) | u128::from(src);
    let res = ((joined << count) >> bits) as u32 & w.mask();
    f.carry = count <= bits && (joined >> (2 * bits - count)) & 1 != 0;
    f.overflow = msb(res, w) != msb(dst, w);
    f.set_szp(res, w);
    (res, f)
}

/// double precision shift right of `dst`, filling from `src`. count is masked to 5 bits
pub fn shrd(dst: u32, src: u32, count: u32, w: Width, mut f: Flags) -> (u32, Flags) {
    let (dst, src) = (dst & w.mask(), src & w.mask());
    let count = count & 0x1F;
    if count == 0 {
        return (dst, f);
    }
    let joined = (u128::from(src) << w.bits()) | u128::from(dst);
    let res = (joined >> count) as u32 & w.mask();
    f.carry = (joined >> (count - 1)) & 1 != 0;
    f.overflow = msb(res, w) != msb(dst, w);
    f.set_szp(res, w);
    (res, f)
}

fn mul_flags(low: u32, overflow: bool, w: Width, mut f: Flags, features: &CpuFeatures) -> Flags {
    f.carry = overflow;
    f.overflow = overflow;
    f.sign = msb(low, w);
    f.set_parity(low);
    f.zero = features.mul_sets_zero && low & w.mask() == 0;
    f
}

/// unsigned multiply, returns the double width product
pub fn mul(dst: u32, src: u32, w: Width, f: Flags, features: &CpuFeatures) -> (u64, Flags) {
    let product = u64::from(dst & w.mask()) * u64::from(src & w.mask());
    let high = product >> w.bits();
    let f = mul_flags(product as u32, high != 0, w, f, features);
    (product, f)
}

/// signed multiply, returns the double width product
pub fn imul(dst: u32, src: u32, w: Width, f: Flags, features: &CpuFeatures) -> (u64, Flags) {
    let product = w.signed(dst) * w.signed(src);
    let low = product as u32 & w.mask();
    let fits = w.signed(low) == product;
    let f = mul_flags(low, !fits, w, f, features);
    (product as u64, f)
}

/// unsigned divide of a double width dividend. None signals a divide error
pub fn div(dividend: u64, divisor: u32, w: Width) -> Option<(u32, u32)> {
    let divisor = u64::from(divisor & w.mask());
    if divisor == 0 {
        return None;
    }
    let quotient = dividend / divisor;
    if quotient > u64::from(w.mask()) {
        return None;
    }
    Some((quotient as u32, (dividend % divisor) as u32))
}

/// signed divide of a sign extended double width dividend. None signals a divide error
pub fn idiv(dividend: i64, divisor: u32, w: Width, features: &CpuFeatures) -> Option<(u32, u32)> {
    let divisor = w.signed(divisor);
    let quotient = dividend.checked_div(divisor)?;
    let remainder = dividend.checked_rem(divisor)?;
    let max = i64::from(w.sign_bit()) - 1;
    let min = if features.idiv_min_quotient { -max - 1 } else { -max };
    if quotient > max || quotient < min {
        return None;
    }
    Some((quotient as u32 & w.mask(), remainder as u32 & w.mask()))
}

/// decimal adjust AL after addition
pub fn daa(al: u8, mut f: Flags) -> (u8, Flags) {
    let old_al = al;
    let old_cf = f.carry;
    let mut al = al;
    f.carry = false;
    if al & 0x0F > 9 || f.adjust {
        let (v, carry) = al.overflowing_add(6);
        al = v;
        f.carry = old_cf || carry;
        f.adjust = true;
    } else {
        f.adjust = false;
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_add(0x60);
        f.carry = true;
    } else {
        f.carry = false;
    }
    f.set_szp(u32::from(al), Width::Byte);
    (al, f)
}

/// decimal adjust AL after subtraction
pub fn das(al: u8, mut f: Flags) -> (u8, Flags) {
    let old_al = al;
    let old_cf = f.carry;
    let mut al = al;
    f.carry = false;
    if al & 0x0F > 9 || f.adjust {
        let (v, borrow) = al.overflowing_sub(6);
        al = v;
        f.carry = old_cf || borrow;
        f.adjust = true;
    } else {
        f.adjust = false;
    }
    if old_al > 0x99 || old_cf {
        al = al.wrapping_sub(0x60);
        f.carry = true;
    }
    f.set_szp(u32::from(al), Width::Byte);
    (al, f)
}

/// ASCII adjust AX after addition
pub fn aaa(ax: u16, mut f: Flags, features: &CpuFeatures) -> (u16, Flags) {
    let (mut al, mut ah) = (ax as u8, (ax >> 8) as u8);
    if al & 0x0F > 9 || f.adjust {
        if features.aaa_adjusts_ax {
            let v = ax.wrapping_add(0x106);
            al = v as u8;
            ah = (v >> 8) as u8;
        } else {
            al = al.wrapping_add(6);
            ah = ah.wrapping_add(1);
        }
        f.adjust = true;
        f.carry = true;
    } else {
        f.adjust = false;
        f.carry = false;
    }
    (u16::from(ah) << 8 | u16::from(al & 0x0F), f)
}

/// ASCII adjust AX after subtraction
pub fn aas(ax: u16, mut f: Flags, features: &CpuFeatures) -> (u16, Flags) {
    let (mut al, mut ah) = (ax as u8, (ax >> 8) as u8);
    if al & 0x0F > 9 || f.adjust {
        if features.aaa_adjusts_ax {
            let v = ax.wrapping_sub(6);
            al = v as u8;
            ah = ((v >> 8) as u8).wrapping_sub(1);
        } else {
            al = al.wrapping_sub(6);
            ah = ah.wrapping_sub(1);
        }
        f.adjust = true;
        f.carry = true;
    } else {
        f.adjust = false;
        f.carry = false;
    }
    (u16::from(ah) << 8 | u16::from(al & 0x0F), f)
}

/// ASCII adjust AX after multiply. None signals a divide error (base 0)
pub fn aam(al: u8, base: u8, mut f: Flags) -> Option<(u16, Flags)> {
    if base == 0 {
        return None;
    }
    let ah = al / base;
    let al = al % base;
    f.carry = false;
    f.overflow = false;
    f.adjust = false;
    f.set_szp(u32::from(al), Width::Byte);
    Some((u16::from(ah) << 8 | u16::from(al), f))
}

/// ASCII adjust AX before division
pub fn aad(ax: u16, base: u8, mut f: Flags) -> (u16, Flags) {
    let (al, ah) = (ax as u8, (ax >> 8) as u8);
    let al = al.wrapping_add(ah.wrapping_mul(base));
    f.carry = false;
    f.overflow = false;
    f.adjust = false;
    f.set_szp(u32::from(al), Width::Byte);
    (u16::from(al), f)
}

/// bit scan forward, None when `src` is zero
pub fn bsf(src: u32, w: Width) -> Option<u32> {
    let src = src & w.mask();
    if src == 0 { None } else { Some(src.trailing_zeros()) }
}

/// bit scan reverse, None when `src` is zero
pub fn bsr(src: u32, w: Width) -> Option<u32> {
    let src = src & w.mask();
    if src == 0 { None } else { Some(31 - src.leading_zeros()) }
}
