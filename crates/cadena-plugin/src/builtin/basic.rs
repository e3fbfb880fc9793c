//! Routing and arithmetic nodes: copy, invert, clamp, linear, recip, exp,
//! log, mult, max, abs, sqrt and the debug tap.
//!
//! These all share the same shape: stateless per-sample math over one or
//! more audio ports, with an optional `Control`/`Notify` pair that applies
//! the same function to a single control value.

use crate::builtin::Desc;
use crate::descriptor::{DescriptorFlags, Instance, PortDef, Ports};

const NULL_OK: DescriptorFlags = DescriptorFlags::SUPPORTS_NULL_DATA;

/* copy */

struct Copy;

impl Instance for Copy {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if let Some(out) = ports.audio_out[0].as_deref_mut() {
            match ports.audio_in[0] {
                Some(input) => out[..n_samples].copy_from_slice(&input[..n_samples]),
                None => out[..n_samples].fill(0.0),
            }
        }
    }
}

static COPY_PORTS: &[PortDef] = &[PortDef::audio_out(0, "Out"), PortDef::audio_in(1, "In")];

pub(crate) static COPY: Desc = Desc {
    name: "copy",
    flags: NULL_OK.union(DescriptorFlags::COPY),
    ports: COPY_PORTS,
    make: |_| Ok(Box::new(Copy)),
};

/* invert */

struct Invert;

impl Instance for Invert {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                *o = -x;
            }
        }
    }
}

static INVERT_PORTS: &[PortDef] = &[PortDef::audio_out(0, "Out"), PortDef::audio_in(1, "In")];

pub(crate) static INVERT: Desc = Desc {
    name: "invert",
    flags: DescriptorFlags::empty(),
    ports: INVERT_PORTS,
    make: |_| Ok(Box::new(Invert)),
};

/* abs */

struct Abs;

impl Instance for Abs {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                *o = x.abs();
            }
        }
    }
}

static ABS_PORTS: &[PortDef] = &[PortDef::audio_out(0, "Out"), PortDef::audio_in(1, "In")];

pub(crate) static ABS: Desc = Desc {
    name: "abs",
    flags: NULL_OK,
    ports: ABS_PORTS,
    make: |_| Ok(Box::new(Abs)),
};

/* sqrt */

struct Sqrt;

impl Instance for Sqrt {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                *o = if x <= 0.0 { 0.0 } else { x.sqrt() };
            }
        }
    }
}

static SQRT_PORTS: &[PortDef] = &[PortDef::audio_out(0, "Out"), PortDef::audio_in(1, "In")];

pub(crate) static SQRT: Desc = Desc {
    name: "sqrt",
    flags: NULL_OK,
    ports: SQRT_PORTS,
    make: |_| Ok(Box::new(Sqrt)),
};

/* clamp */

struct Clamp;

impl Instance for Clamp {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let min = ports.control[1];
        let max = ports.control[2];
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                *o = x.clamp(min, max);
            }
        }
        ports.notify[0] = ports.control[0].clamp(min, max);
    }
}

static CLAMP_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::notify(2, "Notify"),
    PortDef::control_in(3, "Control", 0.0, 0.0, 0.0),
    PortDef::control_in(4, "Min", 0.0, -100.0, 100.0),
    PortDef::control_in(5, "Max", 1.0, -100.0, 100.0),
];

pub(crate) static CLAMP: Desc = Desc {
    name: "clamp",
    flags: NULL_OK,
    ports: CLAMP_PORTS,
    make: |_| Ok(Box::new(Clamp)),
};

/* linear */

struct Linear {
    dsp: cadena_dsp::Dsp,
}

impl Instance for Linear {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let mult = ports.control[1];
        let add = ports.control[2];
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            self.dsp
                .linear(&mut out[..n_samples], &input[..n_samples], mult, add);
        }
        ports.notify[0] = ports.control[0] * mult + add;
    }
}

static LINEAR_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::notify(2, "Notify"),
    PortDef::control_in(3, "Control", 0.0, 0.0, 0.0),
    PortDef::control_in(4, "Mult", 1.0, -10.0, 10.0),
    PortDef::control_in(5, "Add", 0.0, -10.0, 10.0),
];

pub(crate) static LINEAR: Desc = Desc {
    name: "linear",
    flags: NULL_OK,
    ports: LINEAR_PORTS,
    make: |ctx| {
        Ok(Box::new(Linear { dsp: ctx.dsp }))
    },
};

/* recip */

struct Recip;

impl Instance for Recip {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                *o = if x == 0.0 { 0.0 } else { 1.0 / x };
            }
        }
        let c = ports.control[0];
        ports.notify[0] = if c == 0.0 { 0.0 } else { 1.0 / c };
    }
}

static RECIP_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::notify(2, "Notify"),
    PortDef::control_in(3, "Control", 0.0, 0.0, 0.0),
];

pub(crate) static RECIP: Desc = Desc {
    name: "recip",
    flags: NULL_OK,
    ports: RECIP_PORTS,
    make: |_| Ok(Box::new(Recip)),
};

/* exp */

struct Exp;

impl Instance for Exp {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let base = ports.control[1];
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                *o = base.powf(x);
            }
        }
        ports.notify[0] = base.powf(ports.control[0]);
    }
}

static EXP_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::notify(2, "Notify"),
    PortDef::control_in(3, "Control", 0.0, 0.0, 0.0),
    PortDef::control_in(4, "Base", std::f32::consts::E, -10.0, 10.0),
];

pub(crate) static EXP: Desc = Desc {
    name: "exp",
    flags: NULL_OK,
    ports: EXP_PORTS,
    make: |_| Ok(Box::new(Exp)),
};

/* log */

struct Log;

impl Instance for Log {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let base = ports.control[1];
        let m1 = ports.control[2];
        let m2 = ports.control[3];
        let lb = base.log2();
        if let (Some(out), Some(input)) = (ports.audio_out[0].as_deref_mut(), ports.audio_in[0]) {
            for (o, &x) in out[..n_samples].iter_mut().zip(input) {
                *o = m2 * (x * m1).abs().log2() / lb;
            }
        }
        ports.notify[0] = m2 * (ports.control[0] * m1).abs().log2() / lb;
    }
}

static LOG_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In"),
    PortDef::notify(2, "Notify"),
    PortDef::control_in(3, "Control", 0.0, 0.0, 0.0),
    PortDef::control_in(4, "Base", std::f32::consts::E, 2.0, 100.0),
    PortDef::control_in(5, "M1", 1.0, -10.0, 10.0),
    PortDef::control_in(6, "M2", 1.0, -10.0, 10.0),
];

pub(crate) static LOG: Desc = Desc {
    name: "log",
    flags: NULL_OK,
    ports: LOG_PORTS,
    make: |_| Ok(Box::new(Log)),
};

/* mult */

struct Mult {
    dsp: cadena_dsp::Dsp,
}

impl Instance for Mult {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let Some(out) = ports.audio_out[0].as_deref_mut() else {
            return;
        };
        let mut srcs: [&[f32]; 8] = [&[]; 8];
        let mut n_src = 0;
        for slot in ports.audio_in {
            if let Some(input) = slot {
                srcs[n_src] = &input[..n_samples];
                n_src += 1;
            }
        }
        self.dsp.mult(&mut out[..n_samples], &srcs[..n_src]);
    }
}

static MULT_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In 1"),
    PortDef::audio_in(2, "In 2"),
    PortDef::audio_in(3, "In 3"),
    PortDef::audio_in(4, "In 4"),
    PortDef::audio_in(5, "In 5"),
    PortDef::audio_in(6, "In 6"),
    PortDef::audio_in(7, "In 7"),
    PortDef::audio_in(8, "In 8"),
];

pub(crate) static MULT: Desc = Desc {
    name: "mult",
    flags: NULL_OK,
    ports: MULT_PORTS,
    make: |ctx| {
        Ok(Box::new(Mult { dsp: ctx.dsp }))
    },
};

/* max */

struct Max;

impl Instance for Max {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        let Some(out) = ports.audio_out[0].as_deref_mut() else {
            return;
        };
        let mut buf: [&[f32]; 8] = [&[]; 8];
        let mut n_src = 0;
        for slot in ports.audio_in {
            if let Some(input) = slot {
                buf[n_src] = &input[..n_samples];
                n_src += 1;
            }
        }
        let srcs = &buf[..n_src];
        match srcs.len() {
            0 => out[..n_samples].fill(0.0),
            1 => out[..n_samples].copy_from_slice(srcs[0]),
            _ => {
                for i in 0..n_samples {
                    out[i] = srcs[0][i].max(srcs[1][i]);
                }
                for s in &srcs[2..] {
                    for i in 0..n_samples {
                        out[i] = out[i].max(s[i]);
                    }
                }
            }
        }
    }
}

static MAX_PORTS: &[PortDef] = &[
    PortDef::audio_out(0, "Out"),
    PortDef::audio_in(1, "In 1"),
    PortDef::audio_in(2, "In 2"),
    PortDef::audio_in(3, "In 3"),
    PortDef::audio_in(4, "In 4"),
    PortDef::audio_in(5, "In 5"),
    PortDef::audio_in(6, "In 6"),
    PortDef::audio_in(7, "In 7"),
    PortDef::audio_in(8, "In 8"),
];

pub(crate) static MAX: Desc = Desc {
    name: "max",
    flags: NULL_OK,
    ports: MAX_PORTS,
    make: |_| Ok(Box::new(Max)),
};

/* debug */

struct Debug;

impl Instance for Debug {
    fn run(&mut self, ports: &mut Ports<'_, '_>, n_samples: usize) {
        if let Some(input) = ports.audio_in[0] {
            tracing::info!(n_samples, head = ?&input[..n_samples.min(8)], "debug tap");
            if let Some(out) = ports.audio_out[0].as_deref_mut() {
                out[..n_samples].copy_from_slice(&input[..n_samples]);
            }
        }
        tracing::info!(control = ports.control[0], "debug control");
        ports.notify[0] = ports.control[0];
    }
}

static DEBUG_PORTS: &[PortDef] = &[
    PortDef::audio_in(0, "In"),
    PortDef::audio_out(1, "Out"),
    PortDef::control_in(2, "Control", 0.0, 0.0, 0.0),
    PortDef::notify(3, "Notify"),
];

pub(crate) static DEBUG: Desc = Desc {
    name: "debug",
    flags: NULL_OK,
    ports: DEBUG_PORTS,
    make: |_| Ok(Box::new(Debug)),
};
