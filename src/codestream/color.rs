//! Multiple component transforms applied across the first three components.

/// Forward reversible colour transform, in place: (R, G, B) -> (Y, Cb, Cr).
pub fn forward_rct(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
    for ((r, g), b) in c0.iter_mut().zip(c1.iter_mut()).zip(c2.iter_mut()) {
        let (rv, gv, bv) = (*r, *g, *b);
        *r = (rv + 2 * gv + bv) >> 2;
        *g = bv - gv;
        *b = rv - gv;
    }
}

/// Inverse reversible colour transform, in place: (Y, Cb, Cr) -> (R, G, B).
pub fn inverse_rct(c0: &mut [i32], c1: &mut [i32], c2: &mut [i32]) {
    for ((y, cb), cr) in c0.iter_mut().zip(c1.iter_mut()).zip(c2.iter_mut()) {
        let g = *y - ((*cb + *cr) >> 2);
        let r = *cr + g;
        let b = *cb + g;
        *y = r;
        *cb = g;
        *cr = b;
    }
}

pub fn forward_ict(c0: &mut [f32], c1: &mut [f32], c2: &mut [f32]) {
    for ((r, g), b) in c0.iter_mut().zip(c1.iter_mut()).zip(c2.iter_mut()) {
        let (rv, gv, bv) = (*r, *g, *b);
        *r = 0.299 * rv + 0.587 * gv + 0.114 * bv;
        *g = -0.168_736 * rv - 0.331_264 * gv + 0.5 * bv;
        *b = 0.5 * rv - 0.418_688 * gv - 0.081_312 * bv;
    }
}

pub fn inverse_ict(c0: &mut [f32], c1: &mut [f32], c2: &mut [f32]) {
    for ((y, cb), cr) in c0.iter_mut().zip(c1.iter_mut()).zip(c2.iter_mut()) {
        let (yv, cbv, crv) = (*y, *cb, *cr);
        *y = yv + 1.402 * crv;
        *cb = yv - 0.344_136 * cbv - 0.714_136 * crv;
        *cr = yv + 1.772 * cbv;
    }
}
