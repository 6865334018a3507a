//! Copy-on-write editing of boxed slices.

pub fn clone_array_and_insert_at_pos<A: Clone>(v: &[A], a: A, pos: usize) -> Box<[A]> {
    let mut out = Vec::with_capacity(v.len() + 1);
    out.extend_from_slice(&v[0..pos]);
    out.push(a);
    out.extend_from_slice(&v[pos..]);
    out.into()
}

pub fn clone_array_and_remove_at_pos<A: Clone>(v: &[A], pos: usize) -> Box<[A]> {
    let mut out = Vec::with_capacity(v.len() - 1);
    out.extend_from_slice(&v[0..pos]);
    out.extend_from_slice(&v[pos + 1..]);
    out.into()
}

pub fn clone_array_and_set_at_pos<A: Clone>(v: &[A], a: A, pos: usize) -> Box<[A]> {
    let mut out = v.to_vec();
    out[pos] = a;
    out.into()
}

pub fn clone_array_and_extend<A: Clone>(v: &[A], a: A) -> Box<[A]> {
    let mut out = Vec::with_capacity(v.len() + 1);
    out.extend_from_slice(v);
    out.push(a);
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_remove_set_extend() {
        let v = [1u32, 2, 3];
        assert_eq!(&*clone_array_and_insert_at_pos(&v, 9, 1), &[1, 9, 2, 3]);
        assert_eq!(&*clone_array_and_remove_at_pos(&v, 1), &[1, 3]);
        assert_eq!(&*clone_array_and_set_at_pos(&v, 9, 2), &[1, 2, 9]);
        assert_eq!(&*clone_array_and_extend(&v, 4), &[1, 2, 3, 4]);
    }
}
