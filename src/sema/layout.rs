// src/sema/layout.rs
//
// Size and alignment arithmetic plus the layout-permissibility predicates.
// The container walks themselves live in container.rs; everything here is a
// pure function over the arena.

use crate::frontend::ast::{ContainerLayout, PtrLen};
use crate::sema::container::ContainerTable;
use crate::sema::type_arena::{TypeArena, TypeId, TypeKind};

/// Align `x` forward to `a`, which must be a power of two.
pub fn align_forward(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}

/// Offset of the field after one placed at `current` with `field_size`
/// bytes, aligned for the next field.
pub fn next_field_offset(current: u64, field_size: u64, next_align: u64) -> u64 {
    align_forward(current + field_size, next_align)
}

pub fn ceil_pow2_u32(x: u32) -> u32 {
    x.max(1).next_power_of_two()
}

pub fn ceil_pow2_u64(x: u64) -> u64 {
    x.max(1).next_power_of_two()
}

/// Storage bytes of an `iN`/`uN`: zero-width ints are zero-bit, everything
/// else rounds up to a power-of-two byte count.
pub fn int_size_bytes(bits: u32) -> u64 {
    if bits == 0 {
        0
    } else {
        ceil_pow2_u64(bits.div_ceil(8) as u64)
    }
}

/// Host-integer width (bytes) that closes a packed group of `bits` bits.
pub fn host_int_bytes_for_bits(bits: u64) -> u64 {
    ceil_pow2_u64(bits.div_ceil(8))
}

/// Whether a packed group of `bits` bits lands exactly on a whole
/// byte-aligned ABI size and can be closed.
pub fn packed_group_is_closed(bits: u64) -> bool {
    bits > 0 && bits % 8 == 0 && (bits / 8).is_power_of_two()
}

/// The extern-ABI predicate: types a C compiler could declare.
pub fn type_allowed_in_extern(arena: &TypeArena, containers: &ContainerTable, ty: TypeId) -> bool {
    match &arena.get(ty).kind {
        TypeKind::Void | TypeKind::Bool | TypeKind::Float { .. } => true,
        TypeKind::Int { bits, .. } => matches!(bits, 8 | 16 | 32 | 64 | 128),
        TypeKind::Pointer(_) => arena.get(ty).abi_size != Some(0),
        TypeKind::Struct { container } | TypeKind::Union { container } => {
            containers.get(*container).layout != ContainerLayout::Auto
        }
        TypeKind::Enum { container } => containers.get(*container).layout != ContainerLayout::Auto,
        TypeKind::Optional { child } => arena.is_non_null_ptr(*child),
        TypeKind::Fn(info) => info.cc == crate::frontend::ast::CallConv::C,
        TypeKind::Vector { elem, .. } => type_allowed_in_extern(arena, containers, *elem),
        TypeKind::Array { child, .. } => type_allowed_in_extern(arena, containers, *child),
        _ => false,
    }
}

/// The packed predicate: types with a guaranteed in-memory bit
/// representation.
pub fn type_has_bit_repr(arena: &TypeArena, containers: &ContainerTable, ty: TypeId) -> bool {
    let data = arena.get(ty);
    match &data.kind {
        TypeKind::Void
        | TypeKind::Bool
        | TypeKind::Int { .. }
        | TypeKind::Float { .. }
        | TypeKind::Pointer(_)
        | TypeKind::Vector { .. } => true,
        TypeKind::Fn(info) => !info.is_generic,
        TypeKind::Struct { container } | TypeKind::Union { container } => {
            containers.get(*container).layout != ContainerLayout::Auto
        }
        TypeKind::Enum { container } => containers.get(*container).explicit_tag_type,
        TypeKind::Optional { child } => arena.is_non_null_ptr(*child),
        TypeKind::Array { child, .. } => {
            if !type_has_bit_repr(arena, containers, *child) {
                return false;
            }
            // No padding allowed: total bit-count must fill the storage.
            match (data.size_in_bits, data.abi_size) {
                (Some(bits), Some(size)) => bits == size * 8,
                _ => false,
            }
        }
        _ => false,
    }
}

/// "C ABI int" in the sret sense: values C returns in registers.
pub fn is_c_abi_int(arena: &TypeArena, ty: TypeId) -> bool {
    match &arena.get(ty).kind {
        TypeKind::Int { .. }
        | TypeKind::Float { .. }
        | TypeKind::Bool
        | TypeKind::Enum { .. }
        | TypeKind::Void
        | TypeKind::Unreachable
        | TypeKind::Pointer(_)
        | TypeKind::Fn(_)
        | TypeKind::AnyFrame { .. } => true,
        TypeKind::Optional { child } => arena.is_non_null_ptr(*child),
        _ => false,
    }
}

/// Vector element types: int, float, bool, or pointer.
pub fn vector_elem_allowed(arena: &TypeArena, elem: TypeId) -> bool {
    matches!(
        arena.get(elem).kind,
        TypeKind::Int { .. } | TypeKind::Float { .. } | TypeKind::Bool | TypeKind::Pointer(_)
    )
}

/// Whether a pointer descriptor names a C pointer (affects allow_zero).
pub fn ptr_len_implies_allow_zero(len: PtrLen) -> bool {
    len == PtrLen::C
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_forward_is_identity_on_aligned() {
        assert_eq!(align_forward(16, 8), 16);
        assert_eq!(align_forward(17, 8), 24);
        assert_eq!(align_forward(0, 1), 0);
    }

    #[test]
    fn next_field_offset_steps_and_aligns() {
        // u8 at 0, next field aligned to 4 -> offset 4.
        assert_eq!(next_field_offset(0, 1, 4), 4);
        // u32 at 4, next aligned to 8 -> offset 8.
        assert_eq!(next_field_offset(4, 4, 8), 8);
    }

    #[test]
    fn int_sizes_round_to_power_of_two() {
        assert_eq!(int_size_bytes(0), 0);
        assert_eq!(int_size_bytes(1), 1);
        assert_eq!(int_size_bytes(8), 1);
        assert_eq!(int_size_bytes(9), 2);
        assert_eq!(int_size_bytes(24), 4);
        assert_eq!(int_size_bytes(65), 16);
    }

    #[test]
    fn packed_groups_close_on_abi_sizes() {
        assert!(!packed_group_is_closed(3));
        assert!(packed_group_is_closed(8));
        assert!(packed_group_is_closed(16));
        assert!(!packed_group_is_closed(24));
        assert!(packed_group_is_closed(32));
    }

    #[test]
    fn host_int_width_covers_leftover_bits() {
        assert_eq!(host_int_bytes_for_bits(3), 1);
        assert_eq!(host_int_bytes_for_bits(9), 2);
        assert_eq!(host_int_bytes_for_bits(17), 4);
    }
}
